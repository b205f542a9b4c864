pub mod calculator;
pub mod levels;
pub mod oscillators;
pub mod overlaps;
pub mod ta;
pub mod volatility;
pub mod volume;
pub mod window;

// Re-export the calculators
pub use self::calculator::{IndicatorCalculator, IndicatorSettings};
pub use self::levels::LevelCalculator;
pub use self::oscillators::OscillatorCalculator;
pub use self::overlaps::OverlapCalculator;
pub use self::volatility::VolatilityCalculator;
pub use self::volume::VolumeCalculator;
