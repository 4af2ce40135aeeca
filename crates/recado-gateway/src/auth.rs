use jsonwebtoken::{DecodingKey, Validation, decode};

use recado_types::api::{Claims, TokenScope};
use recado_types::events::AuthErrorCode;

/// Verify a bridge token presented at the handshake. The token must carry
/// the gateway scope: a session cookie pasted into the handshake is rejected
/// even though it is signed with the same secret.
pub fn verify_gateway_token(jwt_secret: &str, token: &str) -> Result<Claims, AuthErrorCode> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthErrorCode::InvalidToken)?;

    if data.claims.scope != TokenScope::Gateway {
        return Err(AuthErrorCode::InvalidToken);
    }

    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use recado_types::models::Role;
    use uuid::Uuid;

    const SECRET: &str = "test-secret";

    fn make_token(secret: &str, scope: TokenScope, exp_offset_secs: i64) -> (Uuid, String) {
        let user_id = Uuid::new_v4();
        let claims = Claims {
            sub: user_id,
            username: "amalia".to_string(),
            role: Role::Member,
            scope,
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (user_id, token)
    }

    #[test]
    fn test_valid_token_binds_same_identity() {
        let (user_id, token) = make_token(SECRET, TokenScope::Gateway, 3600);
        let claims = verify_gateway_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "amalia");
    }

    #[test]
    fn test_expired_token_rejected() {
        // well past expiry so the default leeway cannot save it
        let (_, token) = make_token(SECRET, TokenScope::Gateway, -3600);
        assert!(matches!(
            verify_gateway_token(SECRET, &token),
            Err(AuthErrorCode::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let (_, token) = make_token("other-secret", TokenScope::Gateway, 3600);
        assert!(matches!(
            verify_gateway_token(SECRET, &token),
            Err(AuthErrorCode::InvalidToken)
        ));
    }

    #[test]
    fn test_session_cookie_cannot_be_replayed_at_handshake() {
        let (_, token) = make_token(SECRET, TokenScope::Session, 3600);
        assert!(matches!(
            verify_gateway_token(SECRET, &token),
            Err(AuthErrorCode::InvalidToken)
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            verify_gateway_token(SECRET, "no.es.unjwt"),
            Err(AuthErrorCode::InvalidToken)
        ));
    }
}
