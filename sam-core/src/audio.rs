use std::{fs::File, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use ndarray::Array2;
use rubato::{FftFixedIn, Resampler};
use symphonia::core::{
  audio::{AudioBuffer, Signal},
  codecs::CODEC_TYPE_NULL,
  errors::Error as SymphoniaError,
  io::MediaSourceStream,
  probe::Hint,
};

const RESAMPLE_CHUNK: usize = 1024;

/// Decoded audio as `(channels, frames)` samples.
pub struct Audio {
  pub samples: Array2<f32>,
  pub sample_rate: u32,
}

impl Audio {
  pub fn channels(&self) -> usize {
    self.samples.nrows()
  }

  pub fn frames(&self) -> usize {
    self.samples.ncols()
  }

  pub fn duration(&self) -> f64 {
    self.frames() as f64 / self.sample_rate as f64
  }
}

/// Decodes the first audio track of a media file. Video tracks in the same
/// container are ignored.
#[tracing::instrument(skip_all)]
pub fn read_audio(path: impl AsRef<Path>) -> Result<Audio> {
  let path = path.as_ref();
  let src = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
  let mss = MediaSourceStream::new(Box::new(src), Default::default());

  let mut hint = Hint::new();
  if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
    hint.with_extension(ext);
  }

  let probed = symphonia::default::get_probe()
    .format(&hint, mss, &Default::default(), &Default::default())
    .context("Unsupported media format")?;

  let mut format = probed.format;
  let track = format
    .tracks()
    .iter()
    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    .ok_or_else(|| anyhow!("No supported audio tracks"))?;

  let mut decoder = symphonia::default::get_codecs()
    .make(&track.codec_params, &Default::default())
    .context("Unsupported audio codec")?;

  let mut samples: Vec<Vec<f32>> = Vec::new();
  let mut sample_rate = track.codec_params.sample_rate;

  let track_id = track.id;

  tracing::info!("Start decoding...");

  loop {
    let packet = match format.next_packet() {
      Ok(packet) => packet,
      Err(SymphoniaError::ResetRequired) => {
        bail!("Track list changed in the middle of the stream");
      }
      Err(SymphoniaError::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
        break;
      }
      Err(err) => {
        bail!(err);
      }
    };

    if packet.track_id() != track_id {
      tracing::debug!(
        timestamp = packet.ts,
        track = packet.track_id(),
        "Skipping packet of another track"
      );
      continue;
    }

    match decoder.decode(&packet) {
      Ok(decoded) => {
        let spec = *decoded.spec();

        if sample_rate.is_none() {
          sample_rate = Some(spec.rate);
        }

        let channel_num = spec.channels.count();

        if samples.len() < channel_num {
          samples.resize_with(channel_num, Vec::new);
        }

        let mut buf = AudioBuffer::<f32>::new(decoded.capacity() as u64, spec);
        decoded.convert(&mut buf);

        for (ch, plane) in samples.iter_mut().enumerate().take(channel_num) {
          plane.extend_from_slice(buf.chan(ch));
        }
      }
      Err(SymphoniaError::IoError(_)) => {
        tracing::error!(
          timestamp = packet.ts,
          "The packet failed to decode due to an IO error, skip..."
        );
        continue;
      }
      Err(SymphoniaError::DecodeError(_)) => {
        tracing::warn!(
          timestamp = packet.ts,
          "The packet failed to decode due to invalid data, skip..."
        );
        continue;
      }
      Err(err) => {
        bail!(err);
      }
    }
  }

  let sample_rate = sample_rate.ok_or_else(|| anyhow!("Can not get sample rate"))?;

  let channel_num = samples.len();
  let length = samples
    .iter()
    .map(|c| c.len())
    .max()
    .ok_or_else(|| anyhow!("No channel found"))?;

  for plane in samples.iter_mut() {
    plane.resize(length, 0.0);
  }

  let samples = Array2::from_shape_vec(
    (channel_num, length),
    samples.into_iter().flatten().collect(),
  )?;

  tracing::info!(
    channels = channel_num,
    sample_rate,
    seconds = length as f64 / sample_rate as f64,
    "Audio decoded"
  );

  Ok(Audio {
    samples,
    sample_rate,
  })
}

/// Resamples every channel to `target` Hz. The output is aligned with the
/// input (resampler delay removed) and has `round(frames * target / source)`
/// frames.
#[tracing::instrument(skip(audio), fields(from = audio.sample_rate))]
pub fn resample(audio: Audio, target: u32) -> Result<Audio> {
  if audio.sample_rate == target {
    return Ok(audio);
  }

  tracing::info!("Start resampling...");

  let channel_num = audio.channels();
  let length = audio.frames();
  let expected =
    (length as f64 * target as f64 / audio.sample_rate as f64).round() as usize;

  let mut resampler = FftFixedIn::<f32>::new(
    audio.sample_rate as usize,
    target as usize,
    RESAMPLE_CHUNK,
    2,
    channel_num,
  )?;

  let delay = resampler.output_delay();
  let planes: Vec<Vec<f32>> = audio.samples.outer_iter().map(|c| c.to_vec()).collect();
  let mut output: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channel_num];

  let mut pos = 0;
  while pos + RESAMPLE_CHUNK <= length {
    let chunk: Vec<&[f32]> = planes
      .iter()
      .map(|c| &c[pos..pos + RESAMPLE_CHUNK])
      .collect();
    let res = resampler.process(&chunk, None)?;
    for (out, part) in output.iter_mut().zip(res) {
      out.extend(part);
    }
    pos += RESAMPLE_CHUNK;
  }

  if pos < length {
    let chunk: Vec<&[f32]> = planes.iter().map(|c| &c[pos..]).collect();
    let res = resampler.process_partial(Some(chunk.as_slice()), None)?;
    for (out, part) in output.iter_mut().zip(res) {
      out.extend(part);
    }
  }

  // flush the samples still held back by the resampler delay
  while output.first().map_or(0, |c| c.len()) < expected + delay {
    let res = resampler.process_partial::<Vec<f32>>(None, None)?;
    if res.first().map_or(true, |c| c.is_empty()) {
      break;
    }
    for (out, part) in output.iter_mut().zip(res) {
      out.extend(part);
    }
  }

  let mut flat = Vec::with_capacity(channel_num * expected);
  for plane in output {
    let mut plane: Vec<f32> = plane.into_iter().skip(delay).take(expected).collect();
    plane.resize(expected, 0.0);
    flat.extend(plane);
  }

  Ok(Audio {
    samples: Array2::from_shape_vec((channel_num, expected), flat)?,
    sample_rate: target,
  })
}

/// Adapts the channel layout: averages down to mono, or repeats a mono
/// channel up to `channels`.
pub fn remix(samples: Array2<f32>, channels: usize) -> Result<Array2<f32>> {
  let current = samples.nrows();

  if current == channels {
    return Ok(samples);
  }

  match (current, channels) {
    (_, 1) => Ok(samples.mean_axis(ndarray::Axis(0)).map_or_else(
      || Array2::zeros((1, samples.ncols())),
      |mono| mono.insert_axis(ndarray::Axis(0)),
    )),
    (1, n) => {
      let mono = samples.row(0);
      let frames = samples.ncols();
      Ok(Array2::from_shape_fn((n, frames), |(_, i)| mono[i]))
    }
    (from, to) => bail!("Can not remix {from} channels into {to}"),
  }
}
