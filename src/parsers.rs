//! Field parsers shared by the adapters
//!
//! Devices report numbers as compact text: `1w2d3h4m5s`, `-65dBm@6Mbps`,
//! `1234,5678`, `300Mbps-40MHz/2S`, `5180/20-Ce/ac`. Every parser is lenient
//! and returns `None` rather than failing the whole snapshot.

/// Compound duration to seconds. Accepts `1w2d3h4m5s`, `3d 04:05:06`,
/// `04:05:06`, and plain seconds. Sub-second suffixes (`ms`, `us`) are dropped.
pub fn parse_uptime(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(secs);
    }

    // "3d 04:05:06" / "04:05:06"
    if raw.contains(':') {
        let (days, clock) = match raw.split_once(' ') {
            Some((d, c)) => (parse_uptime(d)?, c.trim()),
            None => (0, raw),
        };
        let parts: Vec<u64> = clock
            .split(':')
            .map(|p| p.trim().parse::<u64>())
            .collect::<Result<_, _>>()
            .ok()?;
        let clock_secs = match parts.as_slice() {
            [h, m, s] => h.checked_mul(3600)?.checked_add(m.checked_mul(60)?)?.checked_add(*s)?,
            [m, s] => m.checked_mul(60)?.checked_add(*s)?,
            _ => return None,
        };
        return days.checked_add(clock_secs);
    }

    let mut total: u64 = 0;
    let mut number = String::new();
    let mut seen_unit = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        if c.is_whitespace() {
            continue;
        }
        // "ms" and "us" are sub-second; skip them entirely
        if (c == 'm' || c == 'u') && chars.peek() == Some(&'s') {
            chars.next();
            number.clear();
            seen_unit = true;
            continue;
        }
        let multiplier = match c {
            'w' => 604_800,
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let value: u64 = number.parse().ok()?;
        total = total.checked_add(value.checked_mul(multiplier)?)?;
        number.clear();
        seen_unit = true;
    }

    if !number.is_empty() || !seen_unit {
        return None;
    }
    Some(total)
}

/// Rate string to kbps: `2.7Mbps` → 2700.0, `512kbps` → 512.0, `1Gbps` →
/// 1_000_000.0, bare numbers are taken as bps.
pub fn parse_throughput(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(raw.len());
    let (num, unit) = raw.split_at(split);
    let value: f64 = num.parse().ok()?;
    let unit = unit.trim().to_ascii_lowercase();

    let kbps = match unit.as_str() {
        "" | "bps" => value / 1000.0,
        "kbps" | "k" => value,
        "mbps" | "m" => value * 1000.0,
        "gbps" | "g" => value * 1_000_000.0,
        _ => return None,
    };
    Some(kbps)
}

/// Composite `tx,rx` counter pair
pub fn parse_bytes(raw: &str) -> Option<(u64, u64)> {
    let (tx, rx) = raw.trim().split_once(',')?;
    Some((tx.trim().parse().ok()?, rx.trim().parse().ok()?))
}

/// Signal string to dBm: `-65dBm@6Mbps`, `-65`, `-65 dBm`
pub fn parse_signal(raw: &str) -> Option<i32> {
    let head = raw.trim().split('@').next()?;
    let digits: String = head
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-')
        .collect();
    digits.parse().ok()
}

/// Link rate string to Mbps: `300Mbps-40MHz/2S/SGI` → 300.0, `6Mbps` → 6.0,
/// `866.6` → 866.6
pub fn parse_rate(raw: &str) -> Option<f64> {
    let head = raw.trim().split(['-', '/', ' ']).next()?;
    if head.is_empty() {
        return None;
    }
    // Rates are always given in Mbps (or unit-less Mbps); convert via kbps
    if head.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return head.parse().ok();
    }
    parse_throughput(head).map(|kbps| kbps / 1000.0)
}

/// Leading frequency in MHz: `5180`, `5180/20-Ce/ac`, `2412MHz`
pub fn parse_frequency(raw: &str) -> Option<u32> {
    let digits: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|f: &u32| *f > 0)
}

/// Channel width in MHz: `20/40/80mhz-Ceee` → 80, `40MHz` → 40,
/// `5180/20-Ce/ac` → 40 (one control plus one extension channel)
pub fn parse_channel_width(raw: &str) -> Option<u32> {
    let raw = raw.trim().to_ascii_lowercase();

    // "20/40/80mhz-ceee": the widest listed width wins
    if raw.contains("mhz") {
        let head = raw.split("mhz").next()?;
        return head.split('/').filter_map(|w| w.parse::<u32>().ok()).max();
    }

    // "5180/20-ce/ac": base width times the number of bonded channels
    let mut parts = raw.split('/');
    let _freq = parts.next()?;
    let width_part = parts.next()?;
    let (base, ext) = match width_part.split_once('-') {
        Some((b, e)) => (b.parse::<u32>().ok()?, e),
        None => return width_part.parse().ok(),
    };
    let channels = ext.chars().filter(|c| *c == 'c' || *c == 'e').count().max(1) as u32;
    base.checked_mul(channels)
}

/// Normalize MAC address: uppercase, colon separated (e.g. "aa-bb-cc-dd-ee-ff" → "AA:BB:CC:DD:EE:FF")
pub fn normalize_mac(mac: &str) -> String {
    let hex: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect::<String>()
        .to_uppercase();
    if hex.len() != 12 {
        return mac.trim().to_uppercase();
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// `yes`/`true` → true
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}
