
///The 5x5 RGB Matrix breakout from Pimoroni, an IS31FL3731 LED driver behind i2c.
///
/// Shows one tally as a solid color, or up to five tallies at once with a column per lamp.
pub mod rgbmatrix5x5;
