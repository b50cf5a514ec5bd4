//! Value objects - immutable types that represent domain concepts

mod correlation;
mod snowflake;

pub use correlation::CorrelationToken;
pub use snowflake::{Snowflake, SnowflakeGenerator, SnowflakeParseError};
