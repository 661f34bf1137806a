use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::Rng;
use rand::distr::Alphanumeric;

const PAIRING_CODE_LEN: usize = 24;

/// Random pairing code embedded in a QR payload.
pub fn pairing_code() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(PAIRING_CODE_LEN)
        .map(char::from)
        .collect()
}

/// Build the QR payload shown while a WhatsApp attempt is pending: an SVG
/// data URL carrying the pairing code and the phone it was issued for.
///
/// `phone` must already be normalised (digits and an optional `+`), so it
/// needs no escaping.
pub fn whatsapp_qr_payload(phone: &str, code: &str) -> String {
    let svg = format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" data-pairing="{code}">"#,
            r#"<rect width="200" height="200" fill="white"/>"#,
            r#"<text x="50%" y="50%" text-anchor="middle" dy=".3em" font-size="14" fill="black">QR Code WhatsApp</text>"#,
            r#"<text x="50%" y="60%" text-anchor="middle" dy=".3em" font-size="12" fill="gray">{phone}</text>"#,
            r#"</svg>"#
        ),
        code = code,
        phone = phone,
    );
    format!("data:image/svg+xml;base64,{}", B64.encode(svg))
}
