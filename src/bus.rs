//! Bus clock, lane width and power configuration

use fugit::HertzU32;

/// Source clocks below this cannot produce a card-legal identification
/// clock; configuration refuses to program anything.
pub const MIN_SOURCE_CLOCK_HZ: u32 = 400_000;

/// Divider ratio bounds before the hardware bias is applied.
pub const DIVIDER_MIN_RATIO: u32 = 2;
pub const DIVIDER_MAX_RATIO: u32 = 257;

/// Number of data lanes driven on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusWidth {
    One,
    Four,
    Eight,
}

/// Card power rail sequencing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMode {
    /// Rail off, bus and hardware clocks gated.
    Off,
    /// Pre-charge level only; clocks stay gated.
    Up,
    /// Full power, clocks running.
    On,
}

/// Requested bus operating point, applied atomically under the request lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub clock: HertzU32,
    pub width: BusWidth,
    pub power: PowerMode,
}

/// Computes the biased clock divider field for `target` from `source`.
///
/// The ratio `source / target` is clamped to
/// [[`DIVIDER_MIN_RATIO`], [`DIVIDER_MAX_RATIO`]] and biased by -2, giving
/// the hardware field range 0..=255. Returns `None` for a zero target or a
/// zero ratio, in which case the caller gates the hardware clock off
/// instead of programming a divider.
pub fn clock_divider(source: HertzU32, target: HertzU32) -> Option<u16> {
    let source = source.to_Hz();
    let target = target.to_Hz();
    if target == 0 {
        return None;
    }
    let ratio = source / target;
    if ratio == 0 {
        return None;
    }
    Some((ratio.clamp(DIVIDER_MIN_RATIO, DIVIDER_MAX_RATIO) - DIVIDER_MIN_RATIO) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fugit::RateExtU32;

    #[test]
    fn identification_clock_divider() {
        assert_eq!(clock_divider(48.MHz(), 400.kHz()), Some(118));
    }

    #[test]
    fn exact_ratios_bias_to_field_values() {
        assert_eq!(clock_divider(48.MHz(), 24.MHz()), Some(0));
        assert_eq!(clock_divider(48.MHz(), 12.MHz()), Some(2));
    }

    #[test]
    fn ratio_clamps_at_both_ends() {
        // Faster than half the source clamps up to the minimum ratio.
        assert_eq!(clock_divider(48.MHz(), 48.MHz()), Some(0));
        assert_eq!(clock_divider(48.MHz(), 30.MHz()), Some(0));
        // Ratios past 257 saturate the 8-bit field.
        assert_eq!(clock_divider(48.MHz(), 100.Hz()), Some(255));
    }

    #[test]
    fn unprogrammable_targets_gate_the_clock() {
        assert_eq!(clock_divider(48.MHz(), 0.Hz()), None);
        assert_eq!(clock_divider(400.kHz(), 48.MHz()), None);
    }
}
