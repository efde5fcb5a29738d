//! Tests for the token cache and the credential lifecycle.

use chrono::{Duration, Utc};
use mockito::{Matcher, Server};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use drive_batch::auth::DRIVE_SCOPE;
use drive_batch::{Credential, CredentialManager, DriveError, FileTokenStore, TokenStore};

fn credential(token_uri: &str, expires_in: Duration) -> Credential {
    Credential {
        token: "old-access".to_string(),
        refresh_token: Some("r1".to_string()),
        token_uri: token_uri.to_string(),
        client_id: "cid".to_string(),
        client_secret: "secret".to_string(),
        scopes: vec![DRIVE_SCOPE.to_string()],
        expiry: Some(Utc::now() + expires_in),
    }
}

fn manager(dir: &TempDir) -> CredentialManager {
    CredentialManager::new(
        FileTokenStore::new(dir.path().join("token.json")),
        dir.path().join("credentials.json"),
        vec![DRIVE_SCOPE.to_string()],
    )
}

mod token_store {
    use super::*;

    #[test]
    fn test_missing_cache_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_unparseable_cache_loads_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = FileTokenStore::new(&path);
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        let cred = credential("https://oauth2.googleapis.com/token", Duration::hours(1));

        store.save(&cred).unwrap();
        let loaded = store.load().unwrap().unwrap();

        assert_eq!(loaded.token, cred.token);
        assert_eq!(loaded.refresh_token, cred.refresh_token);
        assert_eq!(loaded.scopes, cred.scopes);
        assert_eq!(
            loaded.expiry.map(|e| e.timestamp()),
            cred.expiry.map(|e| e.timestamp())
        );
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_valid_cached_credential_is_used_as_is() {
        let mut server = Server::new_async().await;
        let token_endpoint = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("token.json");
        let cred = credential(&format!("{}/token", server.url()), Duration::hours(1));
        let mut on_disk = serde_json::to_value(&cred).unwrap();
        on_disk["universe_domain"] = json!("googleapis.com");
        std::fs::write(&cache, on_disk.to_string()).unwrap();
        let before = std::fs::read_to_string(&cache).unwrap();

        let result = manager(&dir).authorize().await.unwrap();

        assert_eq!(result, cred);
        token_endpoint.assert_async().await;
        assert_eq!(std::fs::read_to_string(&cache).unwrap(), before);
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed_and_persisted() {
        let mut server = Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "r1".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "access_token": "new-access",
                    "expires_in": 3599,
                    "scope": DRIVE_SCOPE,
                    "token_type": "Bearer"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let expired = credential(&format!("{}/token", server.url()), -Duration::hours(1));
        manager.persist(&expired).unwrap();

        let refreshed = manager.ensure_valid(manager.load().unwrap()).await.unwrap();

        token_endpoint.assert_async().await;
        assert_eq!(refreshed.token, "new-access");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r1"));
        assert!(!refreshed.is_expired());

        let cached = manager.load().unwrap().unwrap();
        assert_eq!(cached, refreshed);
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_fatal() {
        let mut server = Server::new_async().await;
        let _token_endpoint = server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(
                json!({
                    "error": "invalid_grant",
                    "error_description": "Token has been expired or revoked."
                })
                .to_string(),
            )
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let expired = credential(&format!("{}/token", server.url()), -Duration::minutes(5));
        manager.persist(&expired).unwrap();

        let err = manager.authorize().await.unwrap_err();

        assert!(matches!(err, DriveError::TokenRefreshError(_)));
        assert!(err.to_string().contains("invalid_grant"));
        assert_eq!(manager.load().unwrap().unwrap(), expired);
    }

    #[tokio::test]
    async fn test_without_credential_or_secrets_authorization_fails() {
        let dir = TempDir::new().unwrap();

        let err = manager(&dir).ensure_valid(None).await.unwrap_err();

        assert!(matches!(err, DriveError::Io(_)));
        assert!(!dir.path().join("token.json").exists());
    }

    /// Answer the consent page the way a browser would after the user
    /// grants access: follow the redirect with the code and the same state.
    fn grant_from_browser(url: &str) {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
        let param = |name: &str| {
            query
                .split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == name)
                .map(|(_, value)| urlencoding::decode(value).unwrap().into_owned())
                .unwrap()
        };
        let state = param("state");
        let redirect_uri = param("redirect_uri");

        tokio::spawn(async move {
            let addr = redirect_uri
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string();
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let request = format!(
                "GET /?code=the-code&state={} HTTP/1.1\r\nHost: localhost\r\n\r\n",
                state
            );
            stream.write_all(request.as_bytes()).await.unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            assert!(response.starts_with("HTTP/1.1 200 OK"));
        });
    }

    #[tokio::test]
    async fn test_consent_code_is_exchanged_and_persisted() {
        let mut server = Server::new_async().await;
        let token_endpoint = server
            .mock("POST", "/token")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                Matcher::UrlEncoded("code".into(), "the-code".into()),
                Matcher::UrlEncoded("client_id".into(), "cid".into()),
                Matcher::Regex("code_verifier=[A-Za-z0-9_-]{43}".into()),
                Matcher::Regex("redirect_uri=http%3A%2F%2F127\\.0\\.0\\.1%3A[0-9]+".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "access_token": "fresh-access",
                    "refresh_token": "fresh-refresh",
                    "expires_in": 3599,
                    "token_type": "Bearer"
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let secrets = json!({
            "installed": {
                "client_id": "cid",
                "client_secret": "secret",
                "token_uri": format!("{}/token", server.url())
            }
        });
        std::fs::write(dir.path().join("credentials.json"), secrets.to_string()).unwrap();

        let manager = manager(&dir).with_consent_prompt(grant_from_browser);
        let credential = manager.ensure_valid(None).await.unwrap();

        token_endpoint.assert_async().await;
        assert_eq!(credential.token, "fresh-access");
        assert_eq!(credential.refresh_token.as_deref(), Some("fresh-refresh"));
        assert_eq!(credential.client_id, "cid");
        assert_eq!(credential.scopes, vec![DRIVE_SCOPE.to_string()]);
        assert!(!credential.is_expired());

        let cached = FileTokenStore::new(dir.path().join("token.json"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(cached, credential);
    }

    #[tokio::test]
    async fn test_secrets_without_client_block_are_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("credentials.json"), r#"{"other": {}}"#).unwrap();

        let mut expired_no_refresh =
            credential("https://oauth2.googleapis.com/token", -Duration::hours(1));
        expired_no_refresh.refresh_token = None;

        let err = manager(&dir)
            .ensure_valid(Some(expired_no_refresh))
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::InvalidClientSecrets(_)));
    }
}
