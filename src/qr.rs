//! Provisioning QR rendering.

use qrcode::QrCode;
use qrcode::render::svg;

/// Renders an `otpauth://` URI as an SVG image.
///
/// Callers treat a failure as a degraded display, falling back to the raw
/// secret and URI; it never blocks enrollment.
pub fn render_svg(uri: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(uri.as_bytes())?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(160, 160)
        .build())
}
