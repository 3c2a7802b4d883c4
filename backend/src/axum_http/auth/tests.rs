use super::*;
use jsonwebtoken::{EncodingKey, Header, encode};

const SECRET: &str = "supersecretjwtsecretforunittesting123";

fn token(secret: &str, sub: &str, exp: usize) -> String {
    let claims = UserClaims {
        sub: sub.to_string(),
        email: Some("test@example.com".to_string()),
        name: Some("Test".to_string()),
        exp,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[test]
fn test_verify_success() {
    let verifier = JwtVerifier::new(SECRET);
    let claims = verifier
        .verify(&token(SECRET, "123e4567-e89b-12d3-a456-426614174000", 9999999999))
        .expect("Valid token should pass");

    assert_eq!(claims.sub, "123e4567-e89b-12d3-a456-426614174000");
    assert_eq!(claims.email.as_deref(), Some("test@example.com"));
}

#[test]
fn test_verify_expired() {
    let verifier = JwtVerifier::new(SECRET);
    assert!(verifier.verify(&token(SECRET, "abc", 1)).is_err());
}

#[test]
fn test_verify_invalid_signature() {
    let verifier = JwtVerifier::new(SECRET);
    assert!(verifier.verify(&token("wrongsecret", "abc", 9999999999)).is_err());
}

#[tokio::test]
async fn test_extractor_reads_bearer_token() {
    let request = axum::http::Request::builder()
        .header(
            AUTHORIZATION,
            format!(
                "Bearer {}",
                token(SECRET, "123e4567-e89b-12d3-a456-426614174000", 9999999999)
            ),
        )
        .extension(Arc::new(JwtVerifier::new(SECRET)))
        .body(())
        .unwrap();
    let (mut parts, _) = request.into_parts();

    let user = AuthUser::from_request_parts(&mut parts, &()).await.unwrap();
    assert_eq!(user.user_id.to_string(), "123e4567-e89b-12d3-a456-426614174000");
    assert_eq!(user.customer().name.as_deref(), Some("Test"));
}

#[tokio::test]
async fn test_extractor_rejects_missing_header() {
    let request = axum::http::Request::builder()
        .extension(Arc::new(JwtVerifier::new(SECRET)))
        .body(())
        .unwrap();
    let (mut parts, _) = request.into_parts();

    let result = AuthUser::from_request_parts(&mut parts, &()).await;
    assert!(matches!(result, Err(AppError::Unauthorized)));
}

#[tokio::test]
async fn test_extractor_rejects_non_uuid_subject() {
    let request = axum::http::Request::builder()
        .header(AUTHORIZATION, format!("Bearer {}", token(SECRET, "user-1", 9999999999)))
        .extension(Arc::new(JwtVerifier::new(SECRET)))
        .body(())
        .unwrap();
    let (mut parts, _) = request.into_parts();

    let result = AuthUser::from_request_parts(&mut parts, &()).await;
    assert!(matches!(result, Err(AppError::Unauthorized)));
}
