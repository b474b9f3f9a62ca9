//! Display helpers: explorer links, short keys, SOL amounts and countdowns.

use crate::types::Pubkey;
use solana_sdk::signature::Signature;

const EXPLORER_BASE: &str = "https://solscan.io";

fn cluster_suffix(network: &str) -> String {
    if network == "mainnet-beta" {
        String::new()
    } else {
        format!("?cluster={}", network)
    }
}

pub fn explorer_mint_url(mint: &Pubkey, network: &str) -> String {
    format!("{}/token/{}{}", EXPLORER_BASE, mint, cluster_suffix(network))
}

pub fn explorer_tx_url(signature: &Signature, network: &str) -> String {
    format!("{}/tx/{}{}", EXPLORER_BASE, signature, cluster_suffix(network))
}

pub fn short_pubkey(pubkey: &Pubkey) -> String {
    let s = pubkey.to_string();
    if s.len() > 12 {
        format!("{}..{}", &s[..4], &s[s.len() - 4..])
    } else {
        s
    }
}

/// Format with thousands separators and at most `decimals` fraction digits.
pub fn format_number(value: f64, decimals: usize) -> String {
    let fixed = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, f.trim_end_matches('0')),
        None => (fixed.as_str(), ""),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && (int_part != "0" || !frac_part.is_empty()) {
        "-"
    } else {
        ""
    };
    if frac_part.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac_part)
    }
}

/// SOL amounts are shown with up to three decimals.
pub fn format_sol(value: f64) -> String {
    format_number(value, 3)
}

pub fn format_duration(secs: i64) -> String {
    if secs <= 0 {
        return "0s".into();
    }
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let mins = (secs % 3600) / 60;
    if days > 0 {
        if hours > 0 { format!("{}d {}h", days, hours) } else { format!("{}d", days) }
    } else if hours > 0 {
        if mins > 0 { format!("{}h {}m", hours, mins) } else { format!("{}h", hours) }
    } else if mins > 0 {
        format!("{}m", mins)
    } else {
        format!("{}s", secs)
    }
}
