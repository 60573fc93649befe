use crate::cli::Command;
use anyhow::{bail, Context};
use snip_core::{ShortCode, Shortened, Store, StoreError};
use std::io::Write;
use tracing::warn;

/// Checks that the URL has an http(s) scheme and a host.
pub fn validate_url(url: &str) -> anyhow::Result<()> {
    let Some((scheme, rest)) = url.split_once("://") else {
        bail!("URL must have a valid scheme and host: {url}");
    };

    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        bail!("URL scheme must be http or https: {scheme}");
    }

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || rest.chars().any(char::is_whitespace) {
        bail!("URL must have a valid scheme and host: {url}");
    }

    Ok(())
}

/// Executes one subcommand against `store`, writing results to `out`.
pub async fn run<S, W>(command: Command, store: &S, base_url: &str, out: &mut W) -> anyhow::Result<()>
where
    S: Store + ?Sized,
    W: Write,
{
    match command {
        Command::Shorten { owner, urls } => {
            for url in &urls {
                validate_url(url)?;
            }

            let results = if let [url] = urls.as_slice() {
                vec![store.save(&owner, url, base_url).await?]
            } else {
                store.save_batch(&owner, &urls, base_url).await?
            };

            for (url, shortened) in urls.iter().zip(&results) {
                let status = match shortened {
                    Shortened::Created(_) => "created",
                    Shortened::Conflict(_) => "exists",
                };
                writeln!(out, "{}\t{status}\t{url}", shortened.short_url())?;
            }
        }
        Command::Resolve { code } => {
            let code = ShortCode::new(&code).map_err(|_| StoreError::NotFound(code.clone()))?;
            match store.resolve(&code).await {
                Ok(url) => writeln!(out, "{url}")?,
                Err(StoreError::Gone(_)) => bail!("short code {code} has been deleted"),
                Err(StoreError::NotFound(_)) => bail!("short code {code} not found"),
                Err(e) => return Err(e).context("resolve short code"),
            }
        }
        Command::List { owner } => {
            if owner.is_empty() {
                bail!("listing requires a non-empty owner");
            }
            for entry in store.load_user_urls(&owner, base_url).await? {
                writeln!(out, "{}\t{}", entry.short_url, entry.original_url)?;
            }
        }
        Command::Delete { owner, codes } => {
            if owner.is_empty() {
                bail!("deleting requires a non-empty owner");
            }
            let codes: Vec<ShortCode> = codes
                .iter()
                .filter_map(|raw| match ShortCode::new(raw) {
                    Ok(code) => Some(code),
                    Err(e) => {
                        warn!(code = %raw, error = %e, "Ignoring invalid short code");
                        None
                    }
                })
                .collect();
            let deleted = store.delete_batch(&owner, &codes).await?;
            writeln!(out, "{deleted}")?;
        }
        Command::Ping => {
            store.ping().await.context("storage backend is unreachable")?;
            writeln!(out, "ok")?;
        }
        Command::Bootstrap => {
            store.bootstrap().await.context("bootstrap storage")?;
            writeln!(out, "ok")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snip_storage::MemoryStore;

    const BASE: &str = "http://x/";

    async fn run_to_string(command: Command, store: &MemoryStore) -> anyhow::Result<String> {
        let mut out = Vec::new();
        run(command, store, BASE, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn shorten(owner: &str, urls: &[&str]) -> Command {
        Command::Shorten {
            owner: owner.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("https://example.com").is_ok());
        assert!(validate_url("HTTP://example.com/path?q=1").is_ok());
        assert!(validate_url("example.com").is_err());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("https://").is_err());
        assert!(validate_url("https:///path").is_err());
        assert!(validate_url("https://exa mple.com").is_err());
    }

    #[tokio::test]
    async fn shorten_then_resolve() {
        let store = MemoryStore::new();

        let output = run_to_string(shorten("u1", &["https://example.com"]), &store)
            .await
            .unwrap();
        let mut fields = output.trim_end().split('\t');
        let short_url = fields.next().unwrap().to_string();
        assert_eq!(fields.next(), Some("created"));

        let again = run_to_string(shorten("u2", &["https://example.com"]), &store)
            .await
            .unwrap();
        assert!(again.starts_with(&format!("{short_url}\texists")));

        let code = short_url.trim_start_matches(BASE).to_string();
        let resolved = run_to_string(Command::Resolve { code }, &store).await.unwrap();
        assert_eq!(resolved, "https://example.com\n");
    }

    #[tokio::test]
    async fn shorten_rejects_invalid_url_before_touching_store() {
        let store = MemoryStore::new();

        let err = run_to_string(shorten("u1", &["https://ok.example", "nope"]), &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("scheme"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_then_resolve_reports_gone() {
        let store = MemoryStore::new();
        let output = run_to_string(
            shorten("u1", &["https://a.example", "https://b.example"]),
            &store,
        )
        .await
        .unwrap();
        let codes: Vec<String> = output
            .lines()
            .map(|line| line.split('\t').next().unwrap().trim_start_matches(BASE).to_string())
            .collect();
        assert_eq!(codes.len(), 2);

        let deleted = run_to_string(
            Command::Delete {
                owner: "u1".to_string(),
                codes: vec![codes[0].clone(), "not/valid".to_string()],
            },
            &store,
        )
        .await
        .unwrap();
        assert_eq!(deleted, "1\n");

        let err = run_to_string(Command::Resolve { code: codes[0].clone() }, &store)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("deleted"));

        let listed = run_to_string(
            Command::List {
                owner: "u1".to_string(),
            },
            &store,
        )
        .await
        .unwrap();
        assert_eq!(listed.lines().count(), 1);
        assert!(listed.contains("https://b.example"));
    }

    #[tokio::test]
    async fn resolve_unknown_code() {
        let store = MemoryStore::new();

        let err = run_to_string(
            Command::Resolve {
                code: "missing1".to_string(),
            },
            &store,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn ping_and_bootstrap() {
        let store = MemoryStore::new();

        assert_eq!(run_to_string(Command::Ping, &store).await.unwrap(), "ok\n");
        assert_eq!(run_to_string(Command::Bootstrap, &store).await.unwrap(), "ok\n");
    }

    #[tokio::test]
    async fn list_and_delete_reject_empty_owner() {
        let store = MemoryStore::new();
        let output = run_to_string(shorten("", &["https://anon.example"]), &store)
            .await
            .unwrap();
        let code = output
            .split('\t')
            .next()
            .unwrap()
            .trim_start_matches(BASE)
            .to_string();

        let err = run_to_string(
            Command::Delete {
                owner: String::new(),
                codes: vec![code.clone()],
            },
            &store,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("owner"));

        let err = run_to_string(
            Command::List {
                owner: String::new(),
            },
            &store,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("owner"));

        let resolved = run_to_string(Command::Resolve { code }, &store).await.unwrap();
        assert_eq!(resolved, "https://anon.example\n");
    }
}
