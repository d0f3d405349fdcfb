use std::{fmt, str::FromStr};

use crate::{error::LaunchError, tuning::EncodeTuning};

/// Where the encoder reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlanInput {
    /// Remote stream pulled by the encoder itself (relay).
    Locator(String),
    /// Container bytes fed through the process's stdin (ingest).
    Stdin { format: String },
}

/// What the tee muxer does when one destination cannot be written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FanOutPolicy {
    /// A failing destination fails the whole encode.
    #[default]
    Abort,
    /// A failing destination is dropped; the rest keep streaming.
    Drop,
}

impl FanOutPolicy {
    fn onfail(self) -> &'static str {
        match self {
            FanOutPolicy::Abort => "abort",
            FanOutPolicy::Drop => "ignore",
        }
    }
}

impl FromStr for FanOutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FanOutPolicy::Abort),
            "drop" | "ignore" => Ok(FanOutPolicy::Drop),
            other => Err(format!("unknown fan-out policy: {}", other)),
        }
    }
}

/// One slave of the tee muxer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FanOutTarget {
    pub url: String,
    pub format: String,
}

/// Everything needed to build one encoder command line.
#[derive(Clone, Debug)]
pub struct EncodePlan {
    pub input: PlanInput,
    pub tuning: EncodeTuning,
    pub outputs: Vec<FanOutTarget>,
    pub fan_out: FanOutPolicy,
}

impl EncodePlan {
    pub fn builder() -> EncodePlanBuilder {
        EncodePlanBuilder::default()
    }

    pub fn reads_stdin(&self) -> bool {
        matches!(self.input, PlanInput::Stdin { .. })
    }

    /// Builds the argument list: one input, one encode, every destination a
    /// slave of a single `tee` output so all of them get identical bytes.
    pub fn to_command(&self, program: &str) -> EncoderCommand {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        args.extend(self.tuning.input_args());
        match &self.input {
            PlanInput::Locator(url) => {
                args.extend(["-i".to_string(), url.clone()]);
            }
            PlanInput::Stdin { format } => {
                args.extend([
                    "-f".to_string(),
                    format.clone(),
                    "-i".to_string(),
                    "pipe:0".to_string(),
                ]);
            }
        }

        args.extend(self.tuning.output_args());
        // flv slaves of tee only get codec extradata from a global header
        if self.outputs.iter().any(|o| o.format == "flv") {
            args.extend(["-flags".to_string(), "+global_header".to_string()]);
        }
        args.extend(
            ["-map", "0:v?", "-map", "0:a?", "-f", "tee"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(self.tee_spec());

        EncoderCommand {
            program: program.to_string(),
            args,
        }
    }

    fn tee_spec(&self) -> String {
        self.outputs
            .iter()
            .map(|target| {
                let mut options = format!("f={}:onfail={}", target.format, self.fan_out.onfail());
                if let Some(flags) = &self.tuning.flv_flags {
                    if target.format == "flv" {
                        options.push_str(&format!(":flvflags={}", flags));
                    }
                }
                format!("[{}]{}", options, escape_tee(&target.url))
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Escapes characters the tee muxer treats as separators or quoting.
fn escape_tee(url: &str) -> String {
    let mut escaped = String::with_capacity(url.len());
    for c in url.chars() {
        if matches!(c, '\\' | '|' | '\'') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Default)]
pub struct EncodePlanBuilder {
    input: Option<PlanInput>,
    tuning: Option<EncodeTuning>,
    outputs: Vec<FanOutTarget>,
    fan_out: FanOutPolicy,
}

impl EncodePlanBuilder {
    /// Pull from a remote locator
    pub fn input_url(mut self, url: impl Into<String>) -> Self {
        self.input = Some(PlanInput::Locator(url.into()));
        self
    }

    /// Read `format` container bytes from stdin
    pub fn input_stdin(mut self, format: impl Into<String>) -> Self {
        self.input = Some(PlanInput::Stdin {
            format: format.into(),
        });
        self
    }

    pub fn tuning(mut self, tuning: EncodeTuning) -> Self {
        self.tuning = Some(tuning);
        self
    }

    pub fn fan_out(mut self, policy: FanOutPolicy) -> Self {
        self.fan_out = policy;
        self
    }

    /// Add an FLV/RTMP destination
    pub fn add_flv_output(self, url: impl Into<String>) -> Self {
        self.add_output(url, "flv")
    }

    pub fn add_output(mut self, url: impl Into<String>, format: impl Into<String>) -> Self {
        self.outputs.push(FanOutTarget {
            url: url.into(),
            format: format.into(),
        });
        self
    }

    pub fn build(self) -> Result<EncodePlan, LaunchError> {
        let input = self
            .input
            .ok_or_else(|| LaunchError::InvalidPlan("input is required".to_string()))?;
        if let PlanInput::Locator(url) = &input {
            if url.trim().is_empty() {
                return Err(LaunchError::InvalidPlan("input url is empty".to_string()));
            }
        }
        if self.outputs.is_empty() {
            return Err(LaunchError::InvalidPlan(
                "at least one output is required".to_string(),
            ));
        }
        if let Some(blank) = self.outputs.iter().position(|o| o.url.trim().is_empty()) {
            return Err(LaunchError::InvalidPlan(format!("output {} has no url", blank)));
        }

        let tuning = self.tuning.unwrap_or_else(|| match input {
            PlanInput::Locator(_) => EncodeTuning::relay(),
            PlanInput::Stdin { .. } => EncodeTuning::ingest(),
        });

        Ok(EncodePlan {
            input,
            tuning,
            outputs: self.outputs,
            fan_out: self.fan_out,
        })
    }
}

/// A concrete program invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl EncoderCommand {
    /// Shell-like rendering for logs. Not meant to be re-parsed.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.contains(' ') || arg.contains('|') {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

impl fmt::Display for EncoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str())
    }

    #[test]
    fn test_relay_command_reads_locator() {
        let plan = EncodePlan::builder()
            .input_url("rtmp://src/in")
            .add_flv_output("rtmp://a/1")
            .build()
            .unwrap();

        let cmd = plan.to_command("ffmpeg");
        assert_eq!(cmd.program, "ffmpeg");
        assert_eq!(arg_after(&cmd.args, "-i"), Some("rtmp://src/in"));
        assert_eq!(arg_after(&cmd.args, "-stream_loop"), Some("-1"));
        assert_eq!(arg_after(&cmd.args, "-preset"), Some("veryfast"));
        assert!(!plan.reads_stdin());
    }

    #[test]
    fn test_ingest_command_reads_stdin() {
        let plan = EncodePlan::builder()
            .input_stdin("webm")
            .add_flv_output("rtmp://a/1")
            .build()
            .unwrap();

        let cmd = plan.to_command("/usr/bin/ffmpeg");
        assert_eq!(arg_after(&cmd.args, "-i"), Some("pipe:0"));
        assert_eq!(arg_after(&cmd.args, "-f"), Some("webm"));
        assert_eq!(arg_after(&cmd.args, "-tune"), Some("zerolatency"));
        assert!(plan.reads_stdin());
    }

    #[test]
    fn test_tee_fans_out_single_encode() {
        let plan = EncodePlan::builder()
            .input_stdin("webm")
            .add_flv_output("rtmp://a/1")
            .add_flv_output("rtmp://b/2")
            .build()
            .unwrap();

        let cmd = plan.to_command("ffmpeg");
        // one encoder, one output
        assert_eq!(cmd.args.iter().filter(|a| *a == "-c:v").count(), 1);
        assert_eq!(cmd.args.iter().filter(|a| *a == "tee").count(), 1);
        let tee = cmd.args.last().unwrap();
        assert_eq!(
            tee,
            "[f=flv:onfail=abort:flvflags=no_duration_filesize]rtmp://a/1|\
             [f=flv:onfail=abort:flvflags=no_duration_filesize]rtmp://b/2"
        );
    }

    #[test]
    fn test_flv_outputs_get_global_header() {
        let flv = EncodePlan::builder()
            .input_url("rtmp://src/in")
            .add_flv_output("rtmp://a/1")
            .build()
            .unwrap()
            .to_command("ffmpeg");
        assert_eq!(arg_after(&flv.args, "-flags"), Some("+global_header"));
        let flags = flv.args.iter().position(|a| a == "-flags").unwrap();
        let tee = flv.args.iter().position(|a| a == "tee").unwrap();
        assert!(flags < tee);

        let mpegts = EncodePlan::builder()
            .input_url("rtmp://src/in")
            .add_output("udp://239.0.0.1:1234", "mpegts")
            .build()
            .unwrap()
            .to_command("ffmpeg");
        assert!(!mpegts.args.iter().any(|a| a == "+global_header"));
    }

    #[test]
    fn test_drop_policy_ignores_failed_slave() {
        let plan = EncodePlan::builder()
            .input_url("rtmp://src/in")
            .fan_out(FanOutPolicy::Drop)
            .add_flv_output("rtmp://a/1")
            .build()
            .unwrap();

        let cmd = plan.to_command("ffmpeg");
        assert_eq!(cmd.args.last().unwrap(), "[f=flv:onfail=ignore]rtmp://a/1");
    }

    #[test]
    fn test_tee_escapes_separators() {
        assert_eq!(escape_tee("rtmp://a/x|y"), "rtmp://a/x\\|y");
        assert_eq!(escape_tee("rtmp://a/it's"), "rtmp://a/it\\'s");
    }

    #[test]
    fn test_builder_rejects_incomplete_plans() {
        assert!(matches!(
            EncodePlan::builder().add_flv_output("rtmp://a/1").build(),
            Err(LaunchError::InvalidPlan(_))
        ));
        assert!(matches!(
            EncodePlan::builder().input_url("rtmp://src/in").build(),
            Err(LaunchError::InvalidPlan(_))
        ));
        assert!(matches!(
            EncodePlan::builder()
                .input_url("  ")
                .add_flv_output("rtmp://a/1")
                .build(),
            Err(LaunchError::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_fan_out_policy_parse() {
        assert_eq!("abort".parse::<FanOutPolicy>(), Ok(FanOutPolicy::Abort));
        assert_eq!("DROP".parse::<FanOutPolicy>(), Ok(FanOutPolicy::Drop));
        assert!("retry".parse::<FanOutPolicy>().is_err());
    }
}
