use chrono::{DateTime, Utc};
use uuid::Uuid;

use leadhub_types::models::{Channel, ChannelStatus, ChannelType};

/// Status light shown next to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Online,
    Pending,
    Offline,
    Failed,
}

impl From<ChannelStatus> for Indicator {
    fn from(status: ChannelStatus) -> Self {
        match status {
            ChannelStatus::Connected => Self::Online,
            ChannelStatus::Connecting => Self::Pending,
            ChannelStatus::Disconnected => Self::Offline,
            ChannelStatus::Error => Self::Failed,
        }
    }
}

impl Indicator {
    pub fn label(self) -> &'static str {
        match self {
            Self::Online => "Connected",
            Self::Pending => "Connecting...",
            Self::Offline => "Disconnected",
            Self::Failed => "Error",
        }
    }
}

/// The single input of a section's connect form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectForm {
    /// JSON field the value is sent as.
    pub field: &'static str,
    pub placeholder: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelRow {
    pub channel_id: Uuid,
    pub label: String,
    pub indicator: Indicator,
    /// QR payload, only while connecting.
    pub qr_payload: Option<String>,
    pub error_reason: Option<String>,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub can_disconnect: bool,
    /// Failed and disconnected channels can be reconnected in place.
    pub can_retry: bool,
}

impl PanelRow {
    pub fn from_channel(channel: &Channel) -> Self {
        let indicator = Indicator::from(channel.status);
        Self {
            channel_id: channel.id,
            label: channel
                .address
                .clone()
                .unwrap_or_else(|| placeholder_label(channel.channel_type).to_string()),
            indicator,
            qr_payload: match channel.status {
                ChannelStatus::Connecting => channel.transient_credential.clone(),
                _ => None,
            },
            error_reason: channel.error_reason.clone(),
            last_connected_at: channel.last_connected_at,
            can_disconnect: channel.status.is_live(),
            can_retry: channel.status != ChannelStatus::Connecting
                && channel.status.can_transition_to(ChannelStatus::Connecting),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanelSection {
    pub channel_type: ChannelType,
    pub title: &'static str,
    pub form: ConnectForm,
    pub rows: Vec<PanelRow>,
}

/// One section per channel type, in a fixed order, each listing only its
/// own channels in the order given.
pub fn build_panel(channels: &[Channel]) -> Vec<PanelSection> {
    ChannelType::ALL
        .iter()
        .map(|&channel_type| PanelSection {
            channel_type,
            title: title(channel_type),
            form: form(channel_type),
            rows: channels
                .iter()
                .filter(|c| c.channel_type == channel_type)
                .map(PanelRow::from_channel)
                .collect(),
        })
        .collect()
}

fn title(channel_type: ChannelType) -> &'static str {
    match channel_type {
        ChannelType::Whatsapp => "WhatsApp",
        ChannelType::Instagram => "Instagram",
    }
}

fn form(channel_type: ChannelType) -> ConnectForm {
    match channel_type {
        ChannelType::Whatsapp => ConnectForm {
            field: "phone",
            placeholder: "+55 11 99999-9999",
        },
        ChannelType::Instagram => ConnectForm {
            field: "username",
            placeholder: "@yourbusiness",
        },
    }
}

fn placeholder_label(channel_type: ChannelType) -> &'static str {
    match channel_type {
        ChannelType::Whatsapp => "WhatsApp number",
        ChannelType::Instagram => "Instagram account",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(channel_type: ChannelType, status: ChannelStatus, address: Option<&str>) -> Channel {
        let now = Utc::now();
        Channel {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            channel_type,
            address: address.map(str::to_string),
            status,
            transient_credential: (status == ChannelStatus::Connecting).then(|| "data:qr".to_string()),
            error_reason: (status == ChannelStatus::Error).then(|| "expired".to_string()),
            last_connected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn sections_split_by_type() {
        let channels = vec![
            channel(ChannelType::Whatsapp, ChannelStatus::Connected, Some("+5511999999999")),
            channel(ChannelType::Instagram, ChannelStatus::Connecting, Some("loja")),
            channel(ChannelType::Whatsapp, ChannelStatus::Disconnected, None),
        ];
        let panel = build_panel(&channels);

        assert_eq!(panel.len(), 2);
        assert_eq!(panel[0].channel_type, ChannelType::Whatsapp);
        assert_eq!(panel[0].form.field, "phone");
        assert_eq!(panel[0].rows.len(), 2);
        assert_eq!(panel[0].rows[1].label, "WhatsApp number");
        assert_eq!(panel[1].rows.len(), 1);
        assert_eq!(panel[1].form.field, "username");
    }

    #[test]
    fn rows_follow_status() {
        let pending = PanelRow::from_channel(&channel(ChannelType::Whatsapp, ChannelStatus::Connecting, Some("+55")));
        assert_eq!(pending.indicator, Indicator::Pending);
        assert_eq!(pending.qr_payload.as_deref(), Some("data:qr"));
        assert!(pending.can_disconnect);
        assert!(!pending.can_retry);

        let failed = PanelRow::from_channel(&channel(ChannelType::Whatsapp, ChannelStatus::Error, Some("+55")));
        assert_eq!(failed.indicator, Indicator::Failed);
        assert_eq!(failed.error_reason.as_deref(), Some("expired"));
        assert!(failed.can_disconnect);
        assert!(failed.can_retry);

        let off = PanelRow::from_channel(&channel(ChannelType::Instagram, ChannelStatus::Disconnected, Some("x")));
        assert_eq!(off.indicator, Indicator::Offline);
        assert!(!off.can_disconnect);
        assert!(off.qr_payload.is_none());
    }
}
