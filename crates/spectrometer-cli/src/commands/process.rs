use anyhow::{Context, Result};
use spectrometer_core::{
    Fid1d, Lineshape, PeakOptions, PhaseCorrection, Scale, SpectrumOptions, ZeroFill,
};
use std::path::{Path, PathBuf};

/// What to do with a recorded FID.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub zero_fill: bool,
    /// Manual zero- and first-order phase; `None` phases automatically.
    pub phase: Option<(f64, f64)>,
    pub csv: Option<PathBuf>,
    pub peaks: bool,
    pub scale: Scale,
    pub lineshape: Lineshape,
}

impl ProcessOptions {
    fn spectrum_options(&self) -> SpectrumOptions {
        SpectrumOptions {
            zero_fill: if self.zero_fill {
                ZeroFill::Auto
            } else {
                ZeroFill::Disabled
            },
            fourier_transform: true,
            phase: match self.phase {
                Some((p0, p1)) => PhaseCorrection::Manual { p0, p1 },
                None => PhaseCorrection::Auto,
            },
        }
    }
}

/// Process a `.fid` file and print what was found.
pub fn run_process(file: &Path, options: &ProcessOptions) -> Result<()> {
    let fid =
        Fid1d::from_file(file).with_context(|| format!("Failed to read {}", file.display()))?;

    println!("\n{}", file.display());
    println!("  Sample:         {}", fid.sample());
    println!("  Pulse:          {}", fid.pulse());
    println!(
        "  Recorded:       {}",
        fid.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("  Points:         {}", fid.size());
    println!("  Spectral width: {} Hz", fid.spectral_width());
    println!("  Observation:    {:.6} MHz", fid.observation_freq() / 1e6);

    let (spectrum, p0) = fid
        .spectrum(&options.spectrum_options())
        .context("Failed to process the FID")?;
    let scale = options.scale;
    let magnitude = spectrum.absolute().into_iter().fold(0.0, f64::max);
    let noise = spectrum.noise(None);

    println!("\nSpectrum ({} points)", spectrum.size());
    println!("  Zero-order phase: {p0:.1}°");
    println!("  Strongest line:   {:.3} {scale}", spectrum.max_peak(scale));
    if noise > 0.0 {
        println!("  Peak / noise:     {:.1}", magnitude / noise);
    }

    if let Some(csv) = &options.csv {
        spectrum
            .to_csv(csv, scale)
            .with_context(|| format!("Failed to write {}", csv.display()))?;
        println!("\n✓ Exported spectrum to {}", csv.display());
    }

    if options.peaks {
        let peak_options = PeakOptions {
            lineshape: options.lineshape,
            scale,
            ..PeakOptions::default()
        };
        let peaks = spectrum.peaks(&peak_options).context("Peak picking failed")?;
        println!("\nPeaks ({} found, {} lineshape)", peaks.len(), options.lineshape);
        println!(
            "  {:>12}  {:>12}  {:>12}  {:>12}",
            format!("pos [{scale}]"),
            "amplitude",
            "fwhm",
            "integral"
        );
        for peak in &peaks {
            println!(
                "  {:>12.3}  {:>12.4e}  {:>12.3}  {:>12.4e}",
                peak.location, peak.amplitude, peak.fwhm, peak.signal_strength
            );
        }

        match spectrum.fit(&peak_options) {
            Ok(fit) => {
                println!("\nFitted {} lines", fit.peaks.len());
                for peak in &fit.peaks {
                    println!(
                        "  {:>12.3}  {:>12.4e}  {:>12.3}",
                        peak.location, peak.amplitude, peak.fwhm
                    );
                }
            }
            Err(err) => log::warn!("Lineshape fit failed: {err}"),
        }
    }

    Ok(())
}
