//! Display-unit conversion for the CLI shell
//!
//! The engine only ever sees base units. These helpers convert operator
//! input ("12.5" SD, "3" gwei) at the edge and back again for output.

use alloy_primitives::utils::{format_ether, parse_ether, parse_units};
use alloy_primitives::U256;
use anyhow::{anyhow, Context, Result};

/// Parse a decimal SD amount (18 decimals) into base units
pub fn parse_sd_amount(input: &str) -> Result<U256> {
    let trimmed = input.trim();
    if trimmed.starts_with('-') {
        return Err(anyhow!("amount must not be negative: {}", trimmed));
    }
    parse_ether(trimmed).with_context(|| format!("Invalid SD amount: {}", trimmed))
}

/// Format base units as a decimal SD string
pub fn format_sd(amount: U256) -> String {
    format_ether(amount)
}

/// ETH amounts share the 18-decimal layout with SD
pub fn format_eth(amount: U256) -> String {
    format_ether(amount)
}

/// Convert a gwei price into wei
pub fn gwei_to_wei(gwei: f64) -> Result<u128> {
    if !gwei.is_finite() || gwei < 0.0 {
        return Err(anyhow!("gas price must be a non-negative number, got {}", gwei));
    }
    let parsed = parse_units(&gwei.to_string(), "gwei")
        .with_context(|| format!("Invalid gas price: {} gwei", gwei))?;
    u128::try_from(parsed.get_absolute()).map_err(|_| anyhow!("gas price too large: {} gwei", gwei))
}
