use std::time::Duration;

use leadhub_types::models::ChannelType;

/// Timing knobs for connection attempts and the completion worker.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Simulated handshake time before a WhatsApp attempt completes.
    pub whatsapp_delay: Duration,
    /// Simulated handshake time before an Instagram attempt completes.
    pub instagram_delay: Duration,
    /// How far past its deadline an attempt may be found before it is
    /// declared stale instead of completed.
    pub stale_after: Duration,
    pub poll_interval: Duration,
    /// Maximum rows handled per worker tick.
    pub batch_size: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            whatsapp_delay: Duration::from_secs(5),
            instagram_delay: Duration::from_secs(3),
            stale_after: Duration::from_secs(600),
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

impl LifecycleConfig {
    pub fn delay_for(&self, channel_type: ChannelType) -> Duration {
        match channel_type {
            ChannelType::Whatsapp => self.whatsapp_delay,
            ChannelType::Instagram => self.instagram_delay,
        }
    }
}
