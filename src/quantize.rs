//! Lossy post-compression for assembled APNGs.
//!
//! `apngquant` palette-reduces the file toward the requested quality, then
//! `apngopt` re-packs it. Both steps are strictly best-effort: any failure
//! keeps the unquantized file and records a
//! [`Warning::QualityTargetMissed`] on the item instead of failing it.
//! The pass is skipped outright at high quality targets, where palette
//! reduction costs more fidelity than it saves bytes.

use std::path::{Path, PathBuf};

use crate::{
    error::{AnimorphError, Warning},
    options::ConvertOptions,
    tools::ToolGateway,
};

/// Runs the optional quantize/optimize pass over an assembled APNG.
#[derive(Debug, Clone)]
pub struct Quantizer {
    gateway: ToolGateway,
}

impl Quantizer {
    /// Create a quantizer using the given gateway for tool access.
    pub fn new(gateway: ToolGateway) -> Self {
        Self { gateway }
    }

    /// Quantize and optimize `apng` in place, honoring the options'
    /// [`CompressionPolicy`](crate::CompressionPolicy).
    ///
    /// Never fails the item over compression: tool errors degrade to the
    /// original file plus a warning. Only cancellation propagates.
    pub async fn optimize(
        &self,
        apng: &Path,
        options: &ConvertOptions,
        warnings: &mut Vec<Warning>,
    ) -> Result<(), AnimorphError> {
        if !options.compression.should_quantize(options.quality) {
            log::debug!(
                "{}: quality {} at or above threshold {}, quantization skipped",
                apng.display(),
                options.quality.value,
                options.compression.skip_threshold
            );
            return Ok(());
        }

        match self.quantize_and_pack(apng, options).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                log::warn!(
                    "{}: quantization degraded, keeping unquantized output: {err}",
                    apng.display()
                );
                warnings.push(Warning::QualityTargetMissed);
                Ok(())
            }
        }
    }

    async fn quantize_and_pack(
        &self,
        apng: &Path,
        options: &ConvertOptions,
    ) -> Result<(), AnimorphError> {
        let quality = options.quality.value;
        let quantized = sibling(apng, "quant");

        let quality_arg = format!("--quality={}-{}", quality / 2, quality);
        let mut args: Vec<std::ffi::OsString> =
            vec![quality_arg.into(), "--force".into()];
        if let Some(floyd) = options.floyd {
            args.push(format!("--floyd={floyd}").into());
        }
        args.push("--output".into());
        args.push(quantized.as_os_str().into());
        args.push(apng.as_os_str().into());

        self.gateway.run("apngquant", &args, None).await?;
        tokio::fs::rename(&quantized, apng).await?;

        let packed = sibling(apng, "opt");
        self.gateway
            .run(
                "apngopt",
                &[
                    apng.as_os_str(),
                    packed.as_os_str(),
                    "-z1".as_ref(),
                ],
                None,
            )
            .await?;
        tokio::fs::rename(&packed, apng).await?;
        Ok(())
    }
}

fn sibling(path: &Path, tag: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    path.with_file_name(format!("{stem}.{tag}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_naming() {
        assert_eq!(
            sibling(Path::new("/out/anim.png"), "quant"),
            PathBuf::from("/out/anim.quant.png")
        );
    }
}
