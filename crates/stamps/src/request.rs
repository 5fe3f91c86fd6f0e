use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use foundation::GeoCoordinate;
use image::RgbaImage;
use streaming::StampSubmission;

use crate::config::PipelineConfig;
use crate::error::StampError;
use crate::raster::decode_stamp_image;

/// A stamp submission with its image already base64-decoded.
#[derive(Debug, Clone)]
pub struct StampRequest {
    pub image: Vec<u8>,
    pub latitude: f64,
    pub longitude: f64,
    pub zoom_level: Option<f64>,
    pub user_id: String,
}

/// Everything the write path needs, checked and decoded.
#[derive(Debug, Clone)]
pub struct ValidatedStamp {
    pub center: GeoCoordinate,
    pub zoom: f64,
    pub user_id: String,
    pub image: RgbaImage,
    pub image_bytes: Vec<u8>,
}

impl StampRequest {
    pub fn from_submission(sub: StampSubmission) -> Result<Self, StampError> {
        // Accept data URLs as produced by browser canvases.
        let payload = match sub.image.split_once(";base64,") {
            Some((_, data)) => data,
            None => sub.image.as_str(),
        };
        let image = STANDARD
            .decode(payload.trim())
            .map_err(|e| StampError::invalid("image", format!("not valid base64: {e}")))?;

        Ok(Self {
            image,
            latitude: sub.latitude,
            longitude: sub.longitude,
            zoom_level: sub.zoom_level,
            user_id: sub.user_id,
        })
    }

    /// Check every field and decode the image. Nothing here touches shared
    /// state, so it runs before the submission queues for the texture.
    pub fn validate(self, config: &PipelineConfig) -> Result<ValidatedStamp, StampError> {
        let user_id = self.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(StampError::invalid("userId", "must not be empty"));
        }

        let center = GeoCoordinate::try_new(self.latitude, self.longitude)?;

        let zoom = self.zoom_level.unwrap_or(config.default_zoom);
        let min_zoom = config.region.min_zoom;
        if !zoom.is_finite() || zoom < min_zoom || zoom > config.max_zoom {
            return Err(StampError::invalid(
                "zoomLevel",
                format!("{zoom} outside [{min_zoom}, {}]", config.max_zoom),
            ));
        }

        if self.image.is_empty() {
            return Err(StampError::invalid("image", "image is empty"));
        }
        if self.image.len() > config.max_image_bytes {
            return Err(StampError::invalid(
                "image",
                format!(
                    "{} bytes exceeds limit of {}",
                    self.image.len(),
                    config.max_image_bytes
                ),
            ));
        }
        let image = decode_stamp_image(&self.image)?;

        Ok(ValidatedStamp {
            center,
            zoom,
            user_id,
            image,
            image_bytes: self.image,
        })
    }
}
