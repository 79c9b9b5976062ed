//! Credential output: kubeconfig merge and exec credential responses

use super::kubeconfig::{named_entry, KubeconfigError, OIDC_AUTH_PROVIDER};
use super::types::TokenSet;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

/// API version of the exec credential response
pub const EXEC_CREDENTIAL_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

/// Response printed by an exec credential plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredential {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: ExecCredentialSpec,
    pub status: ExecCredentialStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialSpec {
    #[serde(default)]
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialStatus {
    pub token: String,
    /// RFC 3339 timestamp
    pub expiration_timestamp: String,
}

/// Build the exec credential for a verified token set
pub fn exec_credential(tokens: &TokenSet) -> ExecCredential {
    ExecCredential {
        api_version: EXEC_CREDENTIAL_API_VERSION.to_string(),
        kind: "ExecCredential".to_string(),
        spec: ExecCredentialSpec::default(),
        status: ExecCredentialStatus {
            token: tokens.id_token.clone(),
            expiration_timestamp: tokens.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        },
    }
}

/// Store tokens in the `oidc` auth-provider config of `user`
///
/// Only `id-token` and `refresh-token` are touched. A missing refresh
/// token removes the stale one.
pub fn merge_into_kubeconfig(
    document: &mut Value,
    user: &str,
    tokens: &TokenSet,
) -> Result<(), KubeconfigError> {
    if named_entry(document, "users", user).is_none() {
        return Err(KubeconfigError::UserNotFound(user.to_string()));
    }

    let provider = document
        .get_mut("users")
        .and_then(Value::as_sequence_mut)
        .and_then(|users| {
            users
                .iter_mut()
                .find(|entry| entry.get("name").and_then(Value::as_str) == Some(user))
        })
        .and_then(|entry| entry.get_mut("user"))
        .and_then(|user| user.get_mut("auth-provider"))
        .filter(|provider| {
            provider.get("name").and_then(Value::as_str) == Some(OIDC_AUTH_PROVIDER)
        })
        .ok_or_else(|| KubeconfigError::NotOidc {
            user: user.to_string(),
        })?;

    let Some(provider) = provider.as_mapping_mut() else {
        return Err(KubeconfigError::NotOidc {
            user: user.to_string(),
        });
    };
    let config = provider
        .entry(Value::from("config"))
        .or_insert(Value::Mapping(Mapping::new()));
    if !config.is_mapping() {
        *config = Value::Mapping(Mapping::new());
    }

    if let Some(config) = config.as_mapping_mut() {
        config.insert(
            Value::from("id-token"),
            Value::from(tokens.id_token.clone()),
        );
        match &tokens.refresh_token {
            Some(refresh_token) => {
                config.insert(
                    Value::from("refresh-token"),
                    Value::from(refresh_token.clone()),
                );
            }
            None => {
                config.remove("refresh-token");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn tokens(refresh_token: Option<&str>) -> TokenSet {
        TokenSet {
            access_token: "access".to_string(),
            refresh_token: refresh_token.map(str::to_string),
            id_token: "eyJhbGciOiJSUzI1NiJ9.payload.sig".to_string(),
            expires_at: chrono::Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap(),
            issued_at: chrono::Utc.with_ymd_and_hms(2030, 1, 2, 2, 4, 5).unwrap(),
        }
    }

    #[test]
    fn test_exec_credential_json() {
        let credential = exec_credential(&tokens(None));
        let json = serde_json::to_value(&credential).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "apiVersion": "client.authentication.k8s.io/v1beta1",
                "kind": "ExecCredential",
                "spec": { "interactive": false },
                "status": {
                    "token": "eyJhbGciOiJSUzI1NiJ9.payload.sig",
                    "expirationTimestamp": "2030-01-02T03:04:05Z",
                },
            })
        );
    }

    #[test]
    fn test_merge_preserves_unrelated_config() {
        let mut document: Value = serde_yaml::from_str(
            r#"
users:
- name: alice
  user:
    auth-provider:
      name: oidc
      config:
        client-id: kubernetes
        idp-issuer-url: https://issuer.example.com
        refresh-token: stale
"#,
        )
        .unwrap();

        merge_into_kubeconfig(&mut document, "alice", &tokens(None)).unwrap();

        let config = &document["users"][0]["user"]["auth-provider"]["config"];
        assert_eq!(config["client-id"].as_str(), Some("kubernetes"));
        assert_eq!(
            config["id-token"].as_str(),
            Some("eyJhbGciOiJSUzI1NiJ9.payload.sig")
        );
        assert!(config.get("refresh-token").is_none());

        merge_into_kubeconfig(&mut document, "alice", &tokens(Some("fresh"))).unwrap();
        let config = &document["users"][0]["user"]["auth-provider"]["config"];
        assert_eq!(config["refresh-token"].as_str(), Some("fresh"));
    }

    #[test]
    fn test_merge_unknown_user() {
        let mut document: Value = serde_yaml::from_str("users: []").unwrap();
        assert!(matches!(
            merge_into_kubeconfig(&mut document, "bob", &tokens(None)),
            Err(KubeconfigError::UserNotFound(_))
        ));
    }
}
