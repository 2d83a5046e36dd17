//! Signed-in user identity from the OpenID Connect ID token.
//!
//! The ID token arrives in the same TLS response as the access token,
//! straight from the provider's token endpoint, so its claims are read
//! without verifying the JWS signature. The audience must still name this
//! client.

use super::ProviderError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

/// Longest accepted subject identifier (OIDC caps `sub` at 255 ASCII chars)
const MAX_SUBJECT_LEN: usize = 255;

#[derive(Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::One(aud) => aud == client_id,
            Audience::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

#[derive(Deserialize)]
struct IdTokenClaims {
    sub: String,
    aud: Audience,
    #[serde(default)]
    email: Option<String>,
}

/// Who completed the sign-in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Provider's stable account id, used as the user id
    pub subject: String,
    pub email: Option<String>,
}

impl Identity {
    /// Reads the claims of `id_token` and checks they were issued to `client_id`.
    pub fn from_id_token(id_token: &str, client_id: &str) -> Result<Self, ProviderError> {
        let mut segments = id_token.split('.');
        let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(malformed("not a compact JWS")),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| malformed(&e.to_string()))?;
        let claims: IdTokenClaims =
            serde_json::from_slice(&bytes).map_err(|e| malformed(&e.to_string()))?;

        if !claims.aud.contains(client_id) {
            return Err(malformed("issued to a different client"));
        }
        if claims.sub.is_empty()
            || claims.sub.len() > MAX_SUBJECT_LEN
            || !claims.sub.chars().all(|c| c.is_ascii_graphic())
        {
            return Err(malformed("unusable subject"));
        }

        Ok(Self {
            subject: claims.sub,
            email: claims.email,
        })
    }
}

fn malformed(reason: &str) -> ProviderError {
    ProviderError::Malformed(format!("ID token {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(claims: serde_json::Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    #[test]
    fn test_identity_from_claims() {
        let token = jwt(serde_json::json!({
            "iss": "https://accounts.google.com",
            "sub": "110169484474386276334",
            "aud": "client-id",
            "email": "alice@example.com",
            "email_verified": true
        }));

        let identity = Identity::from_id_token(&token, "client-id").unwrap();
        assert_eq!(identity.subject, "110169484474386276334");
        assert_eq!(identity.email.as_deref(), Some("alice@example.com"));
    }

    #[test]
    fn test_audience_list() {
        let token = jwt(serde_json::json!({"sub": "1", "aud": ["other", "client-id"]}));
        assert!(Identity::from_id_token(&token, "client-id").is_ok());
    }

    #[test]
    fn test_foreign_audience_rejected() {
        let token = jwt(serde_json::json!({"sub": "1", "aud": "someone-else"}));
        let err = Identity::from_id_token(&token, "client-id").unwrap_err();
        assert!(err.to_string().contains("different client"));
    }

    #[test]
    fn test_malformed_tokens() {
        for token in ["", "abc", "a.b", "a.!!!.c", "a.b.c.d"] {
            assert!(
                matches!(
                    Identity::from_id_token(token, "client-id"),
                    Err(ProviderError::Malformed(_))
                ),
                "token {:?}",
                token
            );
        }

        let blank_subject = jwt(serde_json::json!({"sub": "", "aud": "client-id"}));
        assert!(Identity::from_id_token(&blank_subject, "client-id").is_err());
    }
}
