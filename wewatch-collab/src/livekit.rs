use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::LiveKitConfig;

/// How long a media join token stays valid
const MEDIA_TOKEN_LIFETIME_IN_HOURS: i64 = 6;

#[derive(Debug, Error)]
pub enum MediaTokenError {
    #[error("The media service is not configured")]
    NotConfigured,
    #[error("Could not sign media token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGrant {
    pub room: String,
    pub room_join: bool,
    pub can_publish: bool,
    pub can_subscribe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaClaims {
    pub iss: String,
    pub sub: String,
    pub name: String,
    pub nbf: i64,
    pub exp: i64,
    pub video: VideoGrant,
}

/// A signed token for joining a media room, and where to use it
#[derive(Debug, Clone)]
pub struct MediaToken {
    pub token: String,
    pub url: String,
    pub can_publish: bool,
}

/// Who is joining which media room
#[derive(Debug)]
pub struct MediaJoin<'a> {
    pub room: &'a str,
    pub identity: String,
    pub name: &'a str,
    pub can_publish: bool,
}

/// Mints join tokens for the external real-time media service
pub fn media_token(
    config: Option<&LiveKitConfig>,
    join: MediaJoin<'_>,
    now: DateTime<Utc>,
) -> Result<MediaToken, MediaTokenError> {
    let config = config.ok_or(MediaTokenError::NotConfigured)?;

    let claims = MediaClaims {
        iss: config.api_key.clone(),
        sub: join.identity,
        name: join.name.to_string(),
        nbf: now.timestamp(),
        exp: (now + Duration::hours(MEDIA_TOKEN_LIFETIME_IN_HOURS)).timestamp(),
        video: VideoGrant {
            room: join.room.to_string(),
            room_join: true,
            can_publish: join.can_publish,
            can_subscribe: true,
        },
    };

    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.api_secret.as_bytes()),
    )?;

    Ok(MediaToken {
        token,
        url: config.url.to_string(),
        can_publish: join.can_publish,
    })
}

#[cfg(test)]
mod test {
    use jsonwebtoken::{DecodingKey, Validation};
    use url::Url;

    use super::*;

    fn config() -> LiveKitConfig {
        LiveKitConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            url: Url::parse("wss://media.example.com").unwrap(),
        }
    }

    #[test]
    fn token_carries_grants() {
        let config = config();
        let token = media_token(
            Some(&config),
            MediaJoin {
                room: "session-1",
                identity: "7".to_string(),
                name: "ada",
                can_publish: false,
            },
            Utc::now(),
        )
        .unwrap();

        let decoded = jsonwebtoken::decode::<MediaClaims>(
            &token.token,
            &DecodingKey::from_secret(b"secret"),
            &Validation::default(),
        )
        .unwrap()
        .claims;

        assert_eq!(decoded.iss, "key");
        assert_eq!(decoded.sub, "7");
        assert_eq!(decoded.video.room, "session-1");
        assert!(decoded.video.room_join);
        assert!(!decoded.video.can_publish);
        assert!(decoded.video.can_subscribe);
    }

    #[test]
    fn unavailable_without_config() {
        let result = media_token(
            None,
            MediaJoin {
                room: "r",
                identity: "1".to_string(),
                name: "n",
                can_publish: true,
            },
            Utc::now(),
        );

        assert!(matches!(result, Err(MediaTokenError::NotConfigured)));
    }
}
