/// Encoder settings applied to the single shared encode.
///
/// Relay favors quality and steady bitrate, ingest favors latency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeTuning {
    // read input at native frame rate
    pub realtime_input: bool,
    // restart a finite input forever
    pub loop_input: bool,
    pub video_codec: String,
    pub audio_codec: String,
    // "ultrafast", "veryfast", ...
    pub preset: String,
    // "zerolatency"
    pub tune: Option<String>,
    // keyframe interval in frames
    pub gop: u32,
    pub scene_cut_threshold: Option<u32>,
    // kbps
    pub video_bitrate: u32,
    // kbps
    pub max_rate: Option<u32>,
    // kbps
    pub buffer_size: Option<u32>,
    pub pixel_format: String,
    // passed to every flv slave
    pub flv_flags: Option<String>,
}

impl EncodeTuning {
    /// Pulling a remote stream: slower preset, larger rate-control buffer,
    /// finite inputs are looped.
    pub fn relay() -> Self {
        Self {
            realtime_input: true,
            loop_input: true,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "veryfast".to_string(),
            tune: None,
            gop: 60,
            scene_cut_threshold: Some(0),
            video_bitrate: 3000,
            max_rate: Some(3000),
            buffer_size: Some(6000),
            pixel_format: "yuv420p".to_string(),
            flv_flags: None,
        }
    }

    /// Pushed chunks arriving in near real time: fastest preset, short GOP,
    /// zero-latency tuning.
    pub fn ingest() -> Self {
        Self {
            realtime_input: true,
            loop_input: false,
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "ultrafast".to_string(),
            tune: Some("zerolatency".to_string()),
            gop: 30,
            scene_cut_threshold: None,
            video_bitrate: 2500,
            max_rate: None,
            buffer_size: None,
            pixel_format: "yuv420p".to_string(),
            flv_flags: Some("no_duration_filesize".to_string()),
        }
    }

    /// Options placed before `-i`.
    pub fn input_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.realtime_input {
            args.push("-re".to_string());
        }
        if self.loop_input {
            args.extend(["-stream_loop".to_string(), "-1".to_string()]);
        }
        args
    }

    /// Codec and rate-control options placed after the input.
    pub fn output_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
        ];
        if let Some(tune) = &self.tune {
            args.extend(["-tune".to_string(), tune.clone()]);
        }
        args.extend(["-g".to_string(), self.gop.to_string()]);
        if let Some(threshold) = self.scene_cut_threshold {
            args.extend(["-sc_threshold".to_string(), threshold.to_string()]);
        }
        args.extend(["-b:v".to_string(), format!("{}k", self.video_bitrate)]);
        if let Some(max_rate) = self.max_rate {
            args.extend(["-maxrate".to_string(), format!("{}k", max_rate)]);
        }
        if let Some(buffer_size) = self.buffer_size {
            args.extend(["-bufsize".to_string(), format!("{}k", buffer_size)]);
        }
        args.extend(["-pix_fmt".to_string(), self.pixel_format.clone()]);
        args
    }
}
