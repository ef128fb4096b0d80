use serde::{Deserialize, Serialize};

/// Closed taxonomy for everything that can terminate an analysis attempt
/// short of a usable result. Provider transport details never leak past
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    QuotaExceeded,
    Cooldown,
    LoginRequired,
    NoKeyAvailable,
    InvalidKey,
    ApiQuota,
    Network,
    Unknown,
}

impl ErrorKind {
    /// Stable label used in responses and ledger rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::Cooldown => "cooldown",
            ErrorKind::LoginRequired => "login_required",
            ErrorKind::NoKeyAvailable => "no_key_available",
            ErrorKind::InvalidKey => "invalid_key",
            ErrorKind::ApiQuota => "api_quota",
            ErrorKind::Network => "network",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Quota-class denials are 429, unavailability-class 503, missing
    /// identity 401, unreadable input 422.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::QuotaExceeded | ErrorKind::Cooldown | ErrorKind::ApiQuota => 429,
            ErrorKind::LoginRequired => 401,
            ErrorKind::NoKeyAvailable | ErrorKind::InvalidKey | ErrorKind::Network => 503,
            ErrorKind::Unknown => 422,
        }
    }

    /// Message shown to the end user when an attempt terminates with this
    /// kind. Quota/cooldown denials carry richer text on the decision
    /// itself; these cover the provider-side and operational kinds.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::QuotaExceeded => "Daily analysis limit reached.",
            ErrorKind::Cooldown => "Too many analyses in a short time. Please wait a moment.",
            ErrorKind::LoginRequired => "Sign in to analyze images.",
            ErrorKind::NoKeyAvailable => {
                "Analysis capacity is temporarily exhausted. Please try again later."
            }
            ErrorKind::InvalidKey => "Analysis service is temporarily unavailable.",
            ErrorKind::ApiQuota => "Analysis service is busy. Please try again shortly.",
            ErrorKind::Network => "Could not reach the analysis service. Please try again.",
            ErrorKind::Unknown => "Image could not be analyzed. Try a clearer photo.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_labels_are_stable() {
        assert_eq!(ErrorKind::InvalidKey.as_str(), "invalid_key");
        assert_eq!(ErrorKind::ApiQuota.as_str(), "api_quota");
        assert_eq!(ErrorKind::NoKeyAvailable.as_str(), "no_key_available");
        assert_eq!(ErrorKind::QuotaExceeded.as_str(), "quota_exceeded");
    }

    #[test]
    fn status_classes_follow_the_denial_kind() {
        // Quota-class denials are 429, unavailability-class 503.
        assert_eq!(ErrorKind::QuotaExceeded.http_status(), 429);
        assert_eq!(ErrorKind::Cooldown.http_status(), 429);
        assert_eq!(ErrorKind::ApiQuota.http_status(), 429);
        assert_eq!(ErrorKind::LoginRequired.http_status(), 401);
        assert_eq!(ErrorKind::InvalidKey.http_status(), 503);
        assert_eq!(ErrorKind::NoKeyAvailable.http_status(), 503);
        assert_eq!(ErrorKind::Network.http_status(), 503);
        assert_eq!(ErrorKind::Unknown.http_status(), 422);
    }
}
