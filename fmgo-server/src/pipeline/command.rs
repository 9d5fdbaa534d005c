//! Command lines of the three pipeline stages.

use std::process::Stdio;

use fmgo_protocol::Band;
use tokio::process::Command;

use crate::pipeline::config::PipelineConfig;
use crate::settings::PipelineSettings;

/// One stage's executable and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// Short label used in log lines.
    pub name: &'static str,
    pub program: String,
    pub args: Vec<String>,
}

impl StageCommand {
    pub fn new(name: &'static str, program: impl Into<String>) -> Self {
        Self {
            name,
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// A `tokio` command with piped stdout/stderr and the given stdin.
    ///
    /// Children are killed if their handle is dropped, so a partially built
    /// chain never outlives the error that aborted it.
    pub(crate) fn to_command(&self, stdin: Stdio) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl std::fmt::Display for StageCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Build demodulator, resampler and encoder commands for a run.
pub fn build_stages(config: &PipelineConfig, settings: &PipelineSettings) -> [StageCommand; 3] {
    [
        demodulator(config, settings),
        resampler(config, settings),
        encoder(config, settings),
    ]
}

fn demodulator(config: &PipelineConfig, settings: &PipelineSettings) -> StageCommand {
    let mut cmd = StageCommand::new("rtl_fm", &settings.rtl_fm).args([
        "-f".to_string(),
        config.tuned_frequency_hz.to_string(),
    ]);

    cmd = match config.band {
        // -M wfm resets -s/-r, so they must follow it.
        Band::Fm => cmd.args([
            "-M".to_string(),
            "wfm".to_string(),
            "-s".to_string(),
            config.device_sample_rate.to_string(),
            "-r".to_string(),
            config.demod_rate.to_string(),
            "-A".to_string(),
            "fast".to_string(),
            "-E".to_string(),
            "deemp".to_string(),
        ]),
        // Direct sampling on the Q branch; the DC filter removes its bias.
        Band::Am => cmd.args([
            "-M".to_string(),
            "am".to_string(),
            "-s".to_string(),
            config.demod_rate.to_string(),
            "-E".to_string(),
            "direct2".to_string(),
            "-E".to_string(),
            "dc".to_string(),
        ]),
    };

    // Without -g rtl_fm runs the tuner with AGC.
    if let Some(db) = config.gain.manual_db() {
        cmd = cmd.arg("-g").arg(format_db(db));
    }
    cmd.arg("-")
}

fn resampler(config: &PipelineConfig, settings: &PipelineSettings) -> StageCommand {
    let rate = config.demod_rate.to_string();
    let mut cmd = StageCommand::new("sox", &settings.sox)
        .arg("-V1")
        .args(["-t", "raw", "-r", rate.as_str(), "-e", "signed-integer", "-b", "16", "-c", "1", "-"])
        .args(["-t", "wav", "-"]);

    if config.needs_resample() {
        cmd = cmd.arg("rate").arg(config.output_sample_rate.to_string());
    }
    // `gain -n` would buffer the whole input, so a streaming chain boosts
    // through the limiter and then trims to the headroom.
    if let Some(am) = config.am {
        cmd = cmd
            .args(["gain", "-l"])
            .arg(format_db(am.gain_db))
            .arg("gain")
            .arg(format_db(am.normalize_db));
    }
    cmd
}

fn encoder(config: &PipelineConfig, settings: &PipelineSettings) -> StageCommand {
    StageCommand::new("ffmpeg", &settings.ffmpeg)
        .args(["-hide_banner", "-nostdin", "-loglevel", "warning"])
        .args(["-fflags", "+nobuffer", "-f", "wav", "-i", "pipe:0"])
        .args(["-vn", "-ac", "1", "-ar"])
        .arg(config.output_sample_rate.to_string())
        .args(["-c:a", "libmp3lame", "-b:a"])
        .arg(format!("{}k", config.bitrate_kbps))
        // Constant frame sizes for progressive delivery.
        .args(["-reservoir", "0", "-write_xing", "0", "-flush_packets", "1"])
        .args(["-f", "mp3", "pipe:1"])
}

fn format_db(db: f64) -> String {
    if db.fract() == 0.0 {
        format!("{:.0}", db)
    } else {
        format!("{}", db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmgo_protocol::{Gain, StationConfig, TuningRequest};

    fn stages(frequency: i64, gain: Gain) -> [StageCommand; 3] {
        let settings = PipelineSettings::default();
        let request = TuningRequest::new(frequency, Some(gain)).unwrap();
        let config = PipelineConfig::derive(&request, gain, &StationConfig::default(), &settings);
        build_stages(&config, &settings)
    }

    fn has_pair(cmd: &StageCommand, flag: &str, value: &str) -> bool {
        cmd.args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_fm_demodulator() {
        let [demod, resampler, encoder] = stages(99_500_000, Gain::Manual(12.5));
        assert_eq!(demod.program, "rtl_fm");
        assert!(has_pair(&demod, "-f", "99500000"));
        assert!(has_pair(&demod, "-M", "wfm"));
        assert!(has_pair(&demod, "-r", "48000"));
        assert!(has_pair(&demod, "-g", "12.5"));
        assert!(!demod.args.iter().any(|a| a == "direct2"));

        assert!(!resampler.args.iter().any(|a| a == "rate"));
        assert!(!resampler.args.iter().any(|a| a == "gain"));

        assert!(has_pair(&encoder, "-b:a", "128k"));
        assert!(has_pair(&encoder, "-reservoir", "0"));
        assert_eq!(encoder.args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_agc_omits_gain_flag() {
        let [demod, _, _] = stages(99_500_000, Gain::Auto);
        assert!(!demod.args.iter().any(|a| a == "-g"));
        // -T switches the bias tee on rtl_fm, never AGC.
        assert!(!demod.args.iter().any(|a| a == "-T"));
    }

    #[test]
    fn test_am_chain() {
        let [demod, resampler, _] = stages(1_000_000, Gain::Manual(0.0));
        assert!(has_pair(&demod, "-M", "am"));
        assert!(has_pair(&demod, "-E", "direct2"));
        assert!(has_pair(&demod, "-E", "dc"));
        assert!(has_pair(&demod, "-s", "24000"));
        assert!(has_pair(&demod, "-g", "0"));

        assert!(has_pair(&resampler, "-r", "24000"));
        assert!(has_pair(&resampler, "rate", "48000"));
        assert!(has_pair(&resampler, "-l", "20"));
        assert!(has_pair(&resampler, "gain", "-1"));
    }

    #[test]
    fn test_display() {
        let cmd = StageCommand::new("t", "echo").args(["a", "b"]);
        assert_eq!(cmd.to_string(), "echo a b");
    }
}
