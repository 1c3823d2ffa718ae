//! Remote-control key fallback used when the STB never reports a play URL.
//!
//! Keys are sent as HTTP GETs against a secondary endpoint on the STB, one
//! per digit of the channel number followed by OK.

use std::time::Duration;

use log::{debug, warn};

use crate::config::RemoteSection;
use crate::trace::Trace;

/// Key codes for `number` followed by the OK key.
pub fn key_sequence(section: &RemoteSection, number: &str) -> Vec<u32> {
    let mut codes: Vec<u32> = number
        .chars()
        .filter_map(|c| c.to_digit(10))
        .filter_map(|d| section.digit_codes.get(d as usize).copied())
        .collect();
    if !codes.is_empty() {
        codes.push(section.ok_code);
    }
    codes
}

/// Render the key URL for one code.
pub fn key_url(section: &RemoteSection, ip: &str, code: u32) -> String {
    section
        .url_template
        .replace("{ip}", ip)
        .replace("{port}", &section.port.to_string())
        .replace("{code}", &code.to_string())
}

/// Sends key sequences to one STB.
#[derive(Debug, Clone)]
pub struct RemoteKeypad {
    section: RemoteSection,
    #[cfg(feature = "remote-keys")]
    client: Option<reqwest::Client>,
}

impl RemoteKeypad {
    pub fn new(section: RemoteSection) -> Self {
        #[cfg(feature = "remote-keys")]
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(section.request_timeout_ms))
            .build()
        {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("[Remote] HTTP client unavailable: {}", e);
                None
            }
        };

        Self {
            section,
            #[cfg(feature = "remote-keys")]
            client,
        }
    }

    pub fn enabled(&self) -> bool {
        self.section.enabled
    }

    /// Longest `send_number` can take for `number`: every key timing out,
    /// plus the delays between keys. Zero when disabled.
    pub fn worst_case(&self, number: &str) -> Duration {
        if !self.enabled() {
            return Duration::ZERO;
        }
        let keys = key_sequence(&self.section, number).len() as u32;
        let per_key = Duration::from_millis(self.section.request_timeout_ms);
        let delay = Duration::from_millis(self.section.key_delay_ms);
        per_key * keys + delay * keys.saturating_sub(1)
    }

    /// Send `number` as digit keys plus OK. Returns true if at least one key
    /// request was answered; failures are traced, never returned.
    pub async fn send_number(&self, ip: &str, number: &str, trace: &mut Trace) -> bool {
        if !self.enabled() {
            trace.push("remote keys disabled");
            return false;
        }
        let codes = key_sequence(&self.section, number);
        if codes.is_empty() {
            trace.push(format!("remote keys: nothing to send for {:?}", number));
            return false;
        }

        let delay = Duration::from_millis(self.section.key_delay_ms);
        let mut answered = 0;
        for (i, code) in codes.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let url = key_url(&self.section, ip, *code);
            match self.press(&url).await {
                Ok(status) => {
                    debug!("[Remote {}] key {} -> {}", ip, code, status);
                    answered += 1;
                }
                Err(e) => {
                    warn!("[Remote {}] key {} failed: {}", ip, code, e);
                    trace.push(format!("remote key {} failed: {}", code, e));
                }
            }
        }
        trace.push(format!(
            "remote keys {:?} sent for {}: {}/{} answered",
            codes,
            number,
            answered,
            codes.len()
        ));
        answered > 0
    }

    #[cfg(feature = "remote-keys")]
    async fn press(&self, url: &str) -> Result<u16, String> {
        let client = self.client.as_ref().ok_or("no HTTP client")?;
        let response = client.get(url).send().await.map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }

    #[cfg(not(feature = "remote-keys"))]
    async fn press(&self, _url: &str) -> Result<u16, String> {
        Err("built without the remote-keys feature".to_string())
    }
}
