//! Think-time between iterations

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid think time '{0}': expected 'none', a duration like '500ms', or a range like '1s..3s'")]
pub struct InvalidThinkTime(pub String);

/// Pause applied after a flow reaches DONE or ABORTED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkTime {
    #[default]
    None,
    Fixed(Duration),
    /// Uniformly random in `[min, max]`
    Uniform { min: Duration, max: Duration },
}

impl ThinkTime {
    pub fn sample(&self) -> Duration {
        match *self {
            ThinkTime::None => Duration::ZERO,
            ThinkTime::Fixed(d) => d,
            ThinkTime::Uniform { min, max } if max > min => {
                rand::thread_rng().gen_range(min..=max)
            }
            ThinkTime::Uniform { min, .. } => min,
        }
    }

    pub async fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl FromStr for ThinkTime {
    type Err = InvalidThinkTime;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("none") || s == "0" {
            return Ok(ThinkTime::None);
        }

        let parse = |part: &str| {
            humantime::parse_duration(part.trim()).map_err(|_| InvalidThinkTime(s.to_string()))
        };

        match s.split_once("..") {
            Some((min, max)) => {
                let (min, max) = (parse(min)?, parse(max)?);
                if min > max {
                    return Err(InvalidThinkTime(s.to_string()));
                }
                Ok(ThinkTime::Uniform { min, max })
            }
            None => Ok(ThinkTime::Fixed(parse(s)?)),
        }
    }
}

impl fmt::Display for ThinkTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThinkTime::None => write!(f, "none"),
            ThinkTime::Fixed(d) => write!(f, "{}", humantime::format_duration(*d)),
            ThinkTime::Uniform { min, max } => write!(
                f,
                "{}..{}",
                humantime::format_duration(*min),
                humantime::format_duration(*max)
            ),
        }
    }
}
