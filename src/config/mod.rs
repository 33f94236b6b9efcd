//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// HS256 secret shared with the auth service that issues bearer tokens
    pub jwt_secret: String,
    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,

    /// Where matches and tournaments are persisted
    pub storage: StorageConfig,

    /// Simulation and session lifecycle tunables
    pub game: GameConfig,
}

/// Storage backend selection
#[derive(Clone, Debug)]
pub enum StorageConfig {
    /// Process-local tables, lost on restart
    Memory,
    /// Supabase project accessed through PostgREST with the service role key
    Supabase {
        url: String,
        service_role_key: String,
    },
}

/// Game tunables.
///
/// Distances are logical court pixels, speeds are pixels per second and
/// angles are radians.
#[derive(Clone, Debug)]
pub struct GameConfig {
    pub tick_rate: u32,
    pub win_score: u32,

    pub court_width: f32,
    pub court_height: f32,

    pub paddle_width: f32,
    pub paddle_height: f32,
    /// Left edge of the left paddle
    pub left_paddle_x: f32,
    /// Left edge of the right paddle
    pub right_paddle_x: f32,
    pub paddle_speed: f32,

    pub ball_radius: f32,
    pub ball_serve_speed: f32,
    /// Speed multiplier applied on every paddle hit
    pub ball_speedup: f32,
    pub ball_max_speed: f32,
    /// Outgoing angle for a hit on the very edge of a paddle
    pub max_bounce_angle: f32,
    /// Half-width of the cone a serve is picked from
    pub serve_cone: f32,

    /// How often the AI re-reads the court and picks a new target
    pub ai_reaction: Duration,
    /// Distance from target under which the AI stops moving
    pub ai_dead_zone: f32,

    /// Free-play sessions still waiting for players after this long are evicted
    pub session_idle_timeout: Duration,
    /// Finished sessions stay listed this long so clients can read the result
    pub session_finished_grace: Duration,
    pub reap_interval: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            win_score: 5,
            court_width: 800.0,
            court_height: 600.0,
            paddle_width: 10.0,
            paddle_height: 100.0,
            left_paddle_x: 20.0,
            right_paddle_x: 770.0,
            paddle_speed: 420.0,
            ball_radius: 8.0,
            ball_serve_speed: 360.0,
            ball_speedup: 1.05,
            ball_max_speed: 840.0,
            max_bounce_angle: std::f32::consts::FRAC_PI_3,
            serve_cone: std::f32::consts::FRAC_PI_6,
            ai_reaction: Duration::from_millis(250),
            ai_dead_zone: 12.0,
            session_idle_timeout: Duration::from_secs(120),
            session_finished_grace: Duration::from_secs(10),
            reap_interval: Duration::from_secs(1),
        }
    }
}

impl GameConfig {
    /// Fixed simulation step in seconds
    pub fn tick_delta(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate as u64)
    }

    /// AI decision latency expressed in ticks (at least one)
    pub fn ai_reaction_ticks(&self) -> u32 {
        let ticks = self.ai_reaction.as_millis() as u64 * self.tick_rate as u64 / 1000;
        ticks.max(1) as u32
    }

    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let tick_rate = check_tick_rate(parse_var("TICK_RATE", defaults.tick_rate)?)?;
        let win_score: u32 = parse_var("WIN_SCORE", defaults.win_score)?;
        if win_score == 0 {
            return Err(ConfigError::Invalid("WIN_SCORE"));
        }

        Ok(Self {
            tick_rate,
            win_score,
            session_idle_timeout: Duration::from_secs(parse_var(
                "SESSION_IDLE_TIMEOUT_SECS",
                defaults.session_idle_timeout.as_secs(),
            )?),
            session_finished_grace: Duration::from_secs(parse_var(
                "SESSION_FINISHED_GRACE_SECS",
                defaults.session_finished_grace.as_secs(),
            )?),
            ai_reaction: Duration::from_millis(parse_var(
                "AI_REACTION_MS",
                defaults.ai_reaction.as_millis() as u64,
            )?),
            ..defaults
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3003".to_string())
        };

        let storage = match (env::var("SUPABASE_URL"), env::var("SUPABASE_SERVICE_ROLE_KEY")) {
            (Ok(url), Ok(service_role_key)) => StorageConfig::Supabase {
                url,
                service_role_key,
            },
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            _ => StorageConfig::Memory,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            jwt_secret: env::var("AUTH_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("AUTH_JWT_SECRET"))?,
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            storage,
            game: GameConfig::from_env()?,
        })
    }
}

/// Highest tick rate whose period still fits the microsecond timer
pub const MAX_TICK_RATE: u32 = 1_000;

fn check_tick_rate(tick_rate: u32) -> Result<u32, ConfigError> {
    if tick_rate == 0 || tick_rate > MAX_TICK_RATE {
        return Err(ConfigError::Invalid("TICK_RATE"));
    }
    Ok(tick_rate)
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reaction_is_fifteen_ticks_at_sixty_hz() {
        let config = GameConfig::default();
        assert_eq!(config.ai_reaction_ticks(), 15);
        assert_eq!(config.tick_duration(), Duration::from_micros(16_666));
    }

    #[test]
    fn reaction_never_rounds_down_to_zero_ticks() {
        let config = GameConfig {
            ai_reaction: Duration::from_millis(1),
            ..GameConfig::default()
        };
        assert_eq!(config.ai_reaction_ticks(), 1);
    }

    #[test]
    fn tick_rate_must_give_a_nonzero_period() {
        assert!(matches!(check_tick_rate(0), Err(ConfigError::Invalid("TICK_RATE"))));
        assert!(matches!(
            check_tick_rate(2_000_000),
            Err(ConfigError::Invalid("TICK_RATE"))
        ));
        assert_eq!(check_tick_rate(MAX_TICK_RATE).unwrap(), MAX_TICK_RATE);

        let fastest = GameConfig {
            tick_rate: MAX_TICK_RATE,
            ..GameConfig::default()
        };
        assert!(fastest.tick_duration() > Duration::ZERO);
    }

    #[test]
    fn paddles_fit_inside_the_court() {
        let config = GameConfig::default();
        assert!(config.left_paddle_x + config.paddle_width < config.court_width / 2.0);
        assert!(config.right_paddle_x + config.paddle_width <= config.court_width);
    }
}
