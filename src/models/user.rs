use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use validator::Validate;

/// Numeric user id as issued by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(UserId)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

/// The user who performed an action, as shown in notification payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ActorSummary {
    pub id: UserId,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(max = 2048))]
    pub photo: Option<String>,
}

impl ActorSummary {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            photo: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_parsing_and_wire_shape() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId(42));
        assert!("4x2".parse::<UserId>().is_err());
        assert_eq!(serde_json::to_string(&UserId(7)).unwrap(), "7");
    }
}
