//! Login QR payload → browser-displayable data URL.

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    qrcode::{QrCode, render::svg},
};

use crate::{Error, Result};

pub fn render_data_url(payload: &str) -> Result<String> {
    let code = QrCode::new(payload.as_bytes())
        .map_err(|e| Error::message(format!("cannot encode QR payload: {e}")))?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn renders_svg_data_url() {
        let url = render_data_url("2@abc,def,ghi==,jkl==").unwrap();
        let encoded = url.strip_prefix("data:image/svg+xml;base64,").unwrap();
        let svg = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn oversized_payload_is_an_error() {
        assert!(render_data_url(&"x".repeat(8_000)).is_err());
    }
}
