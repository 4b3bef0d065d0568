//! Image decode/encode and file output service
//!
//! Keeps the `image` crate at the edge: the cropper only sees `PixelRaster`
//! and `EncodedImage`.

use crate::{
    error::{DetourError, Result},
    types::{EncodedImage, PixelRaster},
};
use image::{codecs::png::PngEncoder, ImageEncoder};
use std::path::{Path, PathBuf};

/// Service for decoding payloads into rasters and encoding rasters as PNG
pub struct ImageIOService;

impl ImageIOService {
    /// Decode any supported image payload into an RGBA raster
    ///
    /// # Errors
    /// - `DecodeFailure` when the payload is not a decodable image
    ///
    /// # Examples
    /// ```rust
    /// use imgralph::{services::ImageIOService, PixelRaster};
    ///
    /// let raster = PixelRaster::filled(2, 2, [255, 0, 0, 255]);
    /// let png = ImageIOService::encode_png(&raster)?;
    /// let decoded = ImageIOService::decode_raster(png.bytes())?;
    /// assert_eq!(decoded, raster);
    /// # Ok::<(), imgralph::DetourError>(())
    /// ```
    pub fn decode_raster(bytes: &[u8]) -> Result<PixelRaster> {
        if bytes.is_empty() {
            return Err(DetourError::decode("payload is empty"));
        }

        let image = image::load_from_memory(bytes).map_err(|e| {
            DetourError::decode(format!(
                "Failed to decode image ({} bytes): {}",
                bytes.len(),
                e
            ))
        })?;

        log::trace!("Decoded {}x{} image", image.width(), image.height());
        Ok(PixelRaster::from(image.to_rgba8()))
    }

    /// Encode a raster as a lossless, alpha-preserving PNG
    ///
    /// # Errors
    /// - `EncodeFailure` when the encoder rejects the raster or produces no bytes
    pub fn encode_png(raster: &PixelRaster) -> Result<EncodedImage> {
        if raster.is_empty() {
            return Err(DetourError::encode(format!(
                "cannot export a {}x{} raster",
                raster.width(),
                raster.height()
            )));
        }

        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(
                raster.data(),
                raster.width(),
                raster.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| {
                DetourError::encode(format!(
                    "PNG export failed for {}x{} raster: {}",
                    raster.width(),
                    raster.height(),
                    e
                ))
            })?;

        if buffer.is_empty() {
            return Err(DetourError::encode("PNG export produced no bytes"));
        }

        Ok(EncodedImage::png(buffer))
    }

    /// Write a payload to `dir/file_name`, creating the directory if needed
    ///
    /// # Errors
    /// - Directory creation or file write failures
    pub async fn save_payload<P: AsRef<Path>>(
        dir: P,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| DetourError::file_io_error("create output directory", dir, &e))?;

        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| DetourError::file_io_error("write output file", &path, &e))?;

        log::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}
