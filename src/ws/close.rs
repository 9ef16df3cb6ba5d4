//! Gateway close codes.

use snafu::prelude::*;

/// Socket closed by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("{message} ({code})"))]
pub struct GatewayError {
    /// close code
    pub code: u16,
    /// human readable description
    pub message: String,
}

/// Known close codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001, the proxy in front of the gateway restarts
    GoingAway,
    /// 1006, connection dropped without close frame
    Abnormal,
    /// 4000
    UnknownError,
    /// 4001
    UnknownOpcode,
    /// 4002
    DecodeError,
    /// 4003
    NotAuthenticated,
    /// 4004
    AuthenticationFailed,
    /// 4005
    AlreadyAuthenticated,
    /// 4007
    InvalidSequence,
    /// 4008
    RateLimited,
    /// 4009
    SessionTimedOut,
    /// 4010
    InvalidShard,
    /// 4011
    ShardingRequired,
    /// 4012
    InvalidApiVersion,
    /// 4013
    InvalidIntents,
    /// 4014
    DisallowedIntents,
    /// anything else
    Other(u16),
}

/// How the shard reacts to a close code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CloseEffect {
    /// forget the session id
    pub invalidate_session: bool,
    /// `Some(false)` disables reconnect, `None` keeps the configured policy
    pub reconnect: Option<bool>,
    /// restart sequence tracking from zero
    pub reset_sequence: bool,
    /// the token was refused
    pub invalid_token: bool,
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1006 => Self::Abnormal,
            4000 => Self::UnknownError,
            4001 => Self::UnknownOpcode,
            4002 => Self::DecodeError,
            4003 => Self::NotAuthenticated,
            4004 => Self::AuthenticationFailed,
            4005 => Self::AlreadyAuthenticated,
            4007 => Self::InvalidSequence,
            4008 => Self::RateLimited,
            4009 => Self::SessionTimedOut,
            4010 => Self::InvalidShard,
            4011 => Self::ShardingRequired,
            4012 => Self::InvalidApiVersion,
            4013 => Self::InvalidIntents,
            4014 => Self::DisallowedIntents,
            other => Self::Other(other),
        }
    }
}

impl CloseCode {
    /// wire number
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::Abnormal => 1006,
            Self::UnknownError => 4000,
            Self::UnknownOpcode => 4001,
            Self::DecodeError => 4002,
            Self::NotAuthenticated => 4003,
            Self::AuthenticationFailed => 4004,
            Self::AlreadyAuthenticated => 4005,
            Self::InvalidSequence => 4007,
            Self::RateLimited => 4008,
            Self::SessionTimedOut => 4009,
            Self::InvalidShard => 4010,
            Self::ShardingRequired => 4011,
            Self::InvalidApiVersion => 4012,
            Self::InvalidIntents => 4013,
            Self::DisallowedIntents => 4014,
            Self::Other(code) => code,
        }
    }

    /// Reaction of the shard to this code.
    pub fn classify(self) -> CloseEffect {
        let fatal = CloseEffect {
            invalidate_session: true,
            reconnect: Some(false),
            ..Default::default()
        };

        match self {
            Self::Normal => CloseEffect {
                reconnect: Some(false),
                ..Default::default()
            },
            Self::NotAuthenticated => CloseEffect {
                invalidate_session: true,
                ..Default::default()
            },
            Self::AuthenticationFailed => CloseEffect {
                invalid_token: true,
                ..fatal
            },
            Self::InvalidSequence => CloseEffect {
                reset_sequence: true,
                ..Default::default()
            },
            Self::InvalidShard
            | Self::ShardingRequired
            | Self::InvalidApiVersion
            | Self::InvalidIntents
            | Self::DisallowedIntents => fatal,
            _ => CloseEffect::default(),
        }
    }

    /// Whether closing with this code is an error at all.
    pub fn is_error(self) -> bool {
        self != Self::Normal
    }

    /// Error describing this close
    pub fn error(self, reason: &str) -> GatewayError {
        let message = match self {
            Self::Normal => "Clean close".to_string(),
            Self::GoingAway => "Websocket proxy restarting".to_string(),
            Self::Abnormal => "Connection reset by peer".to_string(),
            Self::UnknownError => "Gateway reported an unknown error".to_string(),
            Self::UnknownOpcode => "Gateway received an unknown opcode".to_string(),
            Self::DecodeError => "Gateway received an improperly encoded packet".to_string(),
            Self::NotAuthenticated => "Gateway received a packet before authentication".to_string(),
            Self::AuthenticationFailed => "Authentication failed".to_string(),
            Self::AlreadyAuthenticated => {
                "Gateway received an authentication attempt while already authenticated"
                    .to_string()
            }
            Self::InvalidSequence => "Gateway received an invalid sequence".to_string(),
            Self::RateLimited => "Gateway connection was rate limited".to_string(),
            Self::SessionTimedOut => "Session timed out".to_string(),
            Self::InvalidShard => "Invalid sharding specified".to_string(),
            Self::ShardingRequired => "Shard would handle too many guilds".to_string(),
            Self::InvalidApiVersion => "Invalid API version".to_string(),
            Self::InvalidIntents => "Invalid intents specified".to_string(),
            Self::DisallowedIntents => {
                "Disallowed intents specified, privileged intents must be enabled".to_string()
            }
            Self::Other(code) => format!("Unknown close: {}: {}", code, reason),
        };

        GatewayError {
            code: self.code(),
            message,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_classify_fatal_codes() {
        for code in [4010, 4011, 4012, 4013, 4014] {
            let effect = CloseCode::from(code).classify();
            assert!(effect.invalidate_session, "{}", code);
            assert_eq!(effect.reconnect, Some(false), "{}", code);
            assert!(!effect.invalid_token, "{}", code);
        }

        let effect = CloseCode::from(4004).classify();
        assert!(effect.invalidate_session);
        assert_eq!(effect.reconnect, Some(false));
        assert!(effect.invalid_token);
    }

    #[test]
    fn test_classify_recoverable_codes() {
        for code in [1001, 1006, 4000, 4001, 4002, 4005, 4008, 4009, 4321] {
            assert_eq!(CloseCode::from(code).classify(), CloseEffect::default(), "{}", code);
        }

        assert!(CloseCode::from(4003).classify().invalidate_session);
        assert!(CloseCode::from(4007).classify().reset_sequence);
    }

    #[test]
    fn test_normal_close_does_not_reconnect() {
        let code = CloseCode::from(1000);
        assert_eq!(code.classify().reconnect, Some(false));
        assert!(!code.is_error());
    }

    #[test]
    fn test_code_round_trip_and_unknown_message() {
        assert_eq!(CloseCode::from(4014).code(), 4014);
        let err = CloseCode::from(4321).error("why");
        assert_eq!(err.code, 4321);
        assert_eq!(err.message, "Unknown close: 4321: why");
    }
}
