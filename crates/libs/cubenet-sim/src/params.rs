use cubenet_units::Time;
use serde::Deserialize;

use crate::SimError;

/// Protocol timing and tuning knobs.
///
/// The defaults reproduce the reference protocol; a TOML override file can
/// adjust individual values without recompiling.
#[derive(Debug, Clone)]
pub struct Params {
    /// How long a joiner waits for primary address proposals.
    pub wait_pap_timeout: Time,
    /// How many PAR rounds before claiming the all-zero address.
    pub wait_pap_retries: u32,
    /// How long a proposer waits for the primary address notification.
    pub wait_pan_timeout: Time,
    /// How long a joiner waits for the PAN confirmation.
    pub wait_panc_timeout: Time,
    /// How long a proposer waits for the secondary address notification.
    pub wait_san_timeout: Time,
    /// The heart-bit listening window.
    pub listen_hb_timeout: Time,
    /// The window for WaitMe replies before disconnecting.
    pub wait_waitme_timeout: Time,
    /// How often a connected node broadcasts a heart-bit.
    pub heard_bit_period: Time,
    /// How long a leaver waits for its lookup table acknowledgement.
    pub rendez_vous_lookup_table_received_timeout: Time,
    /// How often unused rendez-vous client cache entries are dropped.
    pub rendez_vous_client_cache_cleaning_period: Time,
    /// Lifetime of a routing table entry.
    pub routing_table_entry_clear_period: Time,
    /// Lifetime of a routing entry's visited bitmap.
    pub routing_table_bitmap_clear_period: Time,
    /// How many neighbours are tried greedily before falling back to the
    /// parent during backtracking.
    pub neighbours_before_parent: u32,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            wait_pap_timeout: Time::from_millis(100),
            wait_pap_retries: 5,
            wait_pan_timeout: Time::from_millis(500),
            wait_panc_timeout: Time::from_millis(100),
            wait_san_timeout: Time::from_millis(100),
            listen_hb_timeout: Time::from_millis(500),
            wait_waitme_timeout: Time::from_millis(10),
            heard_bit_period: Time::from_millis(400),
            rendez_vous_lookup_table_received_timeout: Time::from_millis(100),
            rendez_vous_client_cache_cleaning_period: Time::from_secs(5),
            routing_table_entry_clear_period: Time::from_secs(300),
            routing_table_bitmap_clear_period: Time::from_secs(60),
            neighbours_before_parent: 1,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ParamsFile {
    #[serde(default)]
    protocol: ProtocolSection,
    #[serde(default)]
    network: NetworkSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProtocolSection {
    wait_pap_timeout: Option<String>,
    wait_pap_retries: Option<u32>,
    wait_pan_timeout: Option<String>,
    wait_panc_timeout: Option<String>,
    wait_san_timeout: Option<String>,
    listen_hb_timeout: Option<String>,
    wait_waitme_timeout: Option<String>,
    heard_bit_period: Option<String>,
    rendez_vous_lookup_table_received_timeout: Option<String>,
    rendez_vous_client_cache_cleaning_period: Option<String>,
    routing_table_entry_clear_period: Option<String>,
    routing_table_bitmap_clear_period: Option<String>,
    neighbours_before_parent: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NetworkSection {
    address_length: Option<u16>,
}

fn parse_time(field: &str, value: Option<String>, current: Time) -> Result<Time, SimError> {
    match value {
        None => Ok(current),
        Some(text) => Time::parse(&text, Time::MILLISEC)
            .map_err(|e| SimError::scenario(format!("bad value for {field}: {e}"))),
    }
}

impl Params {
    /// Apply a TOML override file on top of the current values. Returns the
    /// address-length override when the file carries one.
    pub fn apply_toml(&mut self, text: &str) -> Result<Option<u16>, SimError> {
        let file: ParamsFile =
            toml::from_str(text).map_err(|e| SimError::scenario(format!("bad params file: {e}")))?;
        let p = file.protocol;
        self.wait_pap_timeout = parse_time("wait_pap_timeout", p.wait_pap_timeout, self.wait_pap_timeout)?;
        self.wait_pan_timeout = parse_time("wait_pan_timeout", p.wait_pan_timeout, self.wait_pan_timeout)?;
        self.wait_panc_timeout =
            parse_time("wait_panc_timeout", p.wait_panc_timeout, self.wait_panc_timeout)?;
        self.wait_san_timeout = parse_time("wait_san_timeout", p.wait_san_timeout, self.wait_san_timeout)?;
        self.listen_hb_timeout =
            parse_time("listen_hb_timeout", p.listen_hb_timeout, self.listen_hb_timeout)?;
        self.wait_waitme_timeout =
            parse_time("wait_waitme_timeout", p.wait_waitme_timeout, self.wait_waitme_timeout)?;
        self.heard_bit_period = parse_time("heard_bit_period", p.heard_bit_period, self.heard_bit_period)?;
        self.rendez_vous_lookup_table_received_timeout = parse_time(
            "rendez_vous_lookup_table_received_timeout",
            p.rendez_vous_lookup_table_received_timeout,
            self.rendez_vous_lookup_table_received_timeout,
        )?;
        self.rendez_vous_client_cache_cleaning_period = parse_time(
            "rendez_vous_client_cache_cleaning_period",
            p.rendez_vous_client_cache_cleaning_period,
            self.rendez_vous_client_cache_cleaning_period,
        )?;
        self.routing_table_entry_clear_period = parse_time(
            "routing_table_entry_clear_period",
            p.routing_table_entry_clear_period,
            self.routing_table_entry_clear_period,
        )?;
        self.routing_table_bitmap_clear_period = parse_time(
            "routing_table_bitmap_clear_period",
            p.routing_table_bitmap_clear_period,
            self.routing_table_bitmap_clear_period,
        )?;
        if let Some(retries) = p.wait_pap_retries {
            self.wait_pap_retries = retries;
        }
        if let Some(n) = p.neighbours_before_parent {
            self.neighbours_before_parent = n;
        }
        Ok(file.network.address_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol() {
        let p = Params::default();
        assert_eq!(p.wait_pap_timeout, Time::from_millis(100));
        assert_eq!(p.heard_bit_period, Time::from_millis(400));
        assert_eq!(p.routing_table_entry_clear_period, Time::from_secs(300));
        assert_eq!(p.neighbours_before_parent, 1);
        assert_eq!(p.wait_pap_retries, 5);
    }

    #[test]
    fn toml_overrides_selected_fields() {
        let mut p = Params::default();
        let len = p
            .apply_toml(
                "[protocol]\nheard_bit_period = \"1s\"\nwait_pap_retries = 3\n\n[network]\naddress_length = 16\n",
            )
            .unwrap();
        assert_eq!(p.heard_bit_period, Time::from_secs(1));
        assert_eq!(p.wait_pap_retries, 3);
        assert_eq!(p.wait_pan_timeout, Time::from_millis(500));
        assert_eq!(len, Some(16));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut p = Params::default();
        assert!(p.apply_toml("[protocol]\nnot_a_knob = \"1s\"\n").is_err());
        assert!(p.apply_toml("[protocol]\nheard_bit_period = \"1 parsec\"\n").is_err());
    }
}
