use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::{
    error::{AppError, Result},
    models::{
        user::UserId,
        websocket::{user_channel, USER_CHANNEL_PREFIX},
    },
};

type HmacSha256 = Hmac<Sha256>;

/// Prefix pusher-style clients put in front of private channel names.
const PRIVATE_PREFIX: &str = "private-";

/// Gate for joining a user's private notification channel.
#[derive(Clone)]
pub struct ChannelAuthorizer {
    app_key: String,
    app_secret: String,
}

impl ChannelAuthorizer {
    pub fn new(app_key: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_key: app_key.into(),
            app_secret: app_secret.into(),
        }
    }

    /// Owner of a `notifications.{id}` channel. Anything not in exactly that
    /// canonical shape yields `None`.
    pub fn channel_owner(channel: &str) -> Option<UserId> {
        let name = channel.strip_prefix(PRIVATE_PREFIX).unwrap_or(channel);
        let raw_id = name.strip_prefix(USER_CHANNEL_PREFIX)?;
        if raw_id.is_empty() || !raw_id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let id: i64 = raw_id.parse().ok()?;
        // "007" and "7" must not both name the same channel
        (id.to_string() == raw_id).then_some(UserId(id))
    }

    pub fn authorize(&self, user_id: UserId, channel: &str) -> bool {
        Self::channel_owner(channel) == Some(user_id)
    }

    /// Checks a subscription attempt and returns the canonical channel name.
    pub fn authorize_subscription(&self, user_id: UserId, channel: &str) -> Result<String> {
        if self.authorize(user_id, channel) {
            debug!("User {} authorized for channel {}", user_id, channel);
            Ok(user_channel(user_id))
        } else {
            warn!("User {} denied channel {}", user_id, channel);
            Err(AppError::Authorization(format!(
                "Not allowed to subscribe to {}",
                channel
            )))
        }
    }

    /// Pusher-compatible auth string `key:hex(hmac_sha256(secret, "socket_id:channel"))`.
    pub fn sign(&self, user_id: UserId, socket_id: &str, channel: &str) -> Result<String> {
        self.authorize_subscription(user_id, channel)?;

        if !is_valid_socket_id(socket_id) {
            return Err(AppError::bad_request("Invalid socket_id"));
        }

        let mut mac = HmacSha256::new_from_slice(self.app_secret.as_bytes())
            .map_err(|e| AppError::Internal(format!("Invalid broadcast secret: {}", e)))?;
        mac.update(format!("{}:{}", socket_id, channel).as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!("{}:{}", self.app_key, signature))
    }
}

/// Socket ids look like `1234.5678`.
fn is_valid_socket_id(socket_id: &str) -> bool {
    match socket_id.split_once('.') {
        Some((a, b)) => {
            !a.is_empty()
                && !b.is_empty()
                && a.bytes().all(|c| c.is_ascii_digit())
                && b.bytes().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn authorizer() -> ChannelAuthorizer {
        ChannelAuthorizer::new("app-key", "app-secret")
    }

    #[test]
    fn test_owner_matches() {
        let auth = authorizer();
        assert!(auth.authorize(UserId(7), "notifications.7"));
        assert!(auth.authorize(UserId(7), "private-notifications.7"));
        assert!(!auth.authorize(UserId(8), "notifications.7"));
    }

    #[test]
    fn test_malformed_channels_fail_closed() {
        let auth = authorizer();
        for channel in [
            "",
            "notifications.",
            "notifications.abc",
            "notifications.7.extra",
            "notifications.-7",
            "notifications.+7",
            "notifications.007",
            "notifications. 7",
            "notifications.99999999999999999999999",
            "Notifications.7",
            "presence-notifications.7",
            "user_notifications:7",
        ] {
            assert!(!auth.authorize(UserId(7), channel), "{} should be denied", channel);
        }
    }

    #[test]
    fn test_authorize_subscription_error() {
        let result = authorizer().authorize_subscription(UserId(1), "notifications.2");
        assert!(matches!(result, Err(AppError::Authorization(_))));
    }

    #[test]
    fn test_sign_known_vector() {
        let auth = authorizer();
        let signed = auth.sign(UserId(1), "1234.1234", "private-notifications.1").unwrap();

        let mut mac = HmacSha256::new_from_slice(b"app-secret").unwrap();
        mac.update(b"1234.1234:private-notifications.1");
        let expected = format!("app-key:{}", hex::encode(mac.finalize().into_bytes()));
        assert_eq!(signed, expected);

        assert!(auth.sign(UserId(2), "1234.1234", "private-notifications.1").is_err());
        assert!(auth.sign(UserId(1), "not-a-socket", "private-notifications.1").is_err());
    }

    proptest! {
        #[test]
        fn prop_only_owner_is_authorized(user in 0i64..1_000_000, owner in 0i64..1_000_000) {
            let channel = format!("notifications.{}", owner);
            prop_assert_eq!(authorizer().authorize(UserId(user), &channel), user == owner);
        }

        #[test]
        fn prop_arbitrary_channel_never_authorizes_other_users(channel in ".*", user in 0i64..1000) {
            let auth = authorizer();
            if auth.authorize(UserId(user), &channel) {
                let canonical = format!("notifications.{}", user);
                let private = format!("private-notifications.{}", user);
                prop_assert!(channel == canonical || channel == private);
            }
        }
    }
}
