//! Credential checks and SASL PLAIN/LOGIN decoding.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};

use crate::context::SessionContext;

/// `Username:` in base64, the first LOGIN challenge.
pub const LOGIN_USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";
/// `Password:` in base64, the second LOGIN challenge.
pub const LOGIN_PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

/// Verifies a user name and password.
#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    async fn authenticate(&self, context: &SessionContext, user: &str, password: &str) -> bool;
}

/// Creates the authenticator a session will use.
pub trait UserAuthenticatorFactory: Send + Sync {
    fn create(&self, context: &SessionContext) -> Box<dyn UserAuthenticator>;
}

impl<T: UserAuthenticator + Clone + 'static> UserAuthenticatorFactory for T {
    fn create(&self, _context: &SessionContext) -> Box<dyn UserAuthenticator> {
        Box::new(self.clone())
    }
}

/// Rejects every credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUserAuthenticator;

#[async_trait]
impl UserAuthenticator for DefaultUserAuthenticator {
    async fn authenticate(&self, _context: &SessionContext, _user: &str, _password: &str) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslError {
    /// The client sent `*`.
    Cancelled,
    /// Not valid base64, or not valid UTF-8 once decoded.
    InvalidEncoding,
    /// Decoded, but not shaped like the mechanism's response.
    Malformed,
}

/// A user name and password pulled out of a SASL exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Decode one client response line.
///
/// # Errors
/// [`SaslError::Cancelled`] for `*`, [`SaslError::InvalidEncoding`] otherwise.
pub fn decode_response(line: &str) -> Result<String, SaslError> {
    let line = line.trim();
    if line == "*" {
        return Err(SaslError::Cancelled);
    }

    let decoded = STANDARD
        .decode(line)
        .map_err(|_| SaslError::InvalidEncoding)?;

    String::from_utf8(decoded).map_err(|_| SaslError::InvalidEncoding)
}

/// Decode a PLAIN response: `authzid NUL authcid NUL password`.
///
/// # Errors
/// See [`decode_response`]; [`SaslError::Malformed`] if the NUL separators are missing.
pub fn decode_plain(line: &str) -> Result<Credentials, SaslError> {
    let decoded = decode_response(line)?;
    let mut parts = decoded.split('\0');

    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_authzid), Some(user), Some(password), None) if !user.is_empty() => Ok(Credentials {
            user: user.to_string(),
            password: password.to_string(),
        }),
        _ => Err(SaslError::Malformed),
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn login_challenges_decode() {
        assert_eq!(decode_response(LOGIN_USERNAME_CHALLENGE), Ok("Username:".to_string()));
        assert_eq!(decode_response(LOGIN_PASSWORD_CHALLENGE), Ok("Password:".to_string()));
    }

    #[test]
    fn plain_response() {
        let encoded = STANDARD.encode("\0user\0secret");
        assert_eq!(
            decode_plain(&encoded),
            Ok(Credentials {
                user: "user".to_string(),
                password: "secret".to_string(),
            })
        );

        let encoded = STANDARD.encode("admin\0user\0secret");
        assert_eq!(decode_plain(&encoded).map(|c| c.user), Ok("user".to_string()));

        let encoded = STANDARD.encode("no separators");
        assert_eq!(decode_plain(&encoded), Err(SaslError::Malformed));
    }

    #[test]
    fn cancel_and_garbage() {
        assert_eq!(decode_response("*"), Err(SaslError::Cancelled));
        assert_eq!(decode_response("not base64!"), Err(SaslError::InvalidEncoding));
    }

    #[test]
    fn debug_hides_password() {
        let credentials = Credentials {
            user: "user".to_string(),
            password: "secret".to_string(),
        };
        assert!(!format!("{credentials:?}").contains("secret"));
    }
}
