extern crate ffmpeg_next as ffmpeg;

use std::sync::OnceLock;
use std::time::Duration;

use color_eyre::eyre::{self, Context};
use ffmpeg::codec::Context as CodecContext;
use ffmpeg::decoder::Video as DecoderVideo;
use ffmpeg::format::context::Input as FormatContext;
use ffmpeg::format::{input_with_dictionary, Pixel};
use ffmpeg::frame::Video as FrameVideo;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::context::Context as ScalingContext;
use ffmpeg::util::log as ffmpeglog;
use ffmpeg::{Dictionary, Packet as CodecPacket};
use image::RgbImage;

pub type Result<T> = eyre::Result<T>;

static FFMPEG_INITIALIZED: OnceLock<std::result::Result<(), ffmpeg::Error>> =
    OnceLock::new();

/// How long to sleep between polls when the stream has nothing queued yet.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One poll of the decoding pump.
enum Poll {
    Frame(RgbImage),
    /// Everything queued on the connection has been consumed.
    Dry,
    End,
}

/// Decodes frames from a video source, typically a live RTSP camera. The connection
/// is held open for the lifetime of this struct, one instance per capture session.
pub struct FrameSource {
    ictx: FormatContext,
    decoder: DecoderVideo,
    converter: ScalingContext,
    video_stream_index: usize,
}

impl FrameSource {
    pub fn open(url: &str) -> Result<Self> {
        if let Err(e) = FFMPEG_INITIALIZED.get_or_init(|| {
            ffmpeg::init()?;
            ffmpeglog::set_level(ffmpeglog::Level::Error);
            Ok(())
        }) {
            return Err(*e).wrap_err("Failed to initialize ffmpeg");
        }

        let options = {
            let mut options = Dictionary::new();
            options.set("analyzeduration", "10M");
            options.set("probesize", "5M"); // this is the default
            if url.starts_with("rtsp://") {
                // interleaved tcp, udp drops too much on flaky camera networks
                options.set("rtsp_transport", "tcp");
            }
            options
        };
        let mut ictx = input_with_dictionary(&url, options)
            .wrap_err("Failed to open the stream")?;

        // packet reads must return EAGAIN once the queue is empty, a grab has to be
        // able to tell buffered frames from the one it would block waiting for
        format_set_nonblocking(&mut ictx);

        let video = ictx
            .streams()
            .best(Type::Video)
            .ok_or(eyre::eyre!("No video stream"))?;
        let video_stream_index = video.index();

        let decoder = CodecContext::from_parameters(video.parameters())
            .wrap_err("No codec found")?
            .decoder()
            .video()
            .wrap_err("No codec found, of type video (?)")?;

        let converter = Self::pixel_converter(&decoder)?;

        // no point in decoding audio or subtitles
        ictx.streams_mut()
            .filter(|stream| stream.index() != video_stream_index)
            .for_each(|mut stream| stream_set_discard_all(&mut stream));

        Ok(Self {
            ictx,
            decoder,
            converter,
            video_stream_index,
        })
    }

    fn pixel_converter(decoder: &DecoderVideo) -> Result<ScalingContext> {
        eyre::ensure!(decoder.format() != Pixel::None, "No pixel format");
        Ok(ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::Flags::FAST_BILINEAR,
        )?)
    }

    /// The frame closest to now. Everything that queued up on the connection while
    /// the caller slept is decoded and thrown away except for the newest frame; only
    /// when nothing at all was buffered does this wait for the next one to arrive.
    /// `Ok(None)` means the stream ended, which a live camera normally never does.
    pub fn latest_frame(&mut self) -> Result<Option<RgbImage>> {
        let Self {
            ictx,
            decoder,
            converter,
            video_stream_index,
        } = self;

        drain_newest(
            || poll_frame(ictx, decoder, converter, *video_stream_index),
            || std::thread::sleep(POLL_INTERVAL),
        )
    }
}

/// Pump the decoder until it produces a frame, reports the queue as dry, or the
/// stream ends.
fn poll_frame(
    ictx: &mut FormatContext,
    decoder: &mut DecoderVideo,
    converter: &mut ScalingContext,
    video_stream_index: usize,
) -> Result<Poll> {
    loop {
        let mut frame = FrameVideo::empty();
        // avcodec_receive_frame
        match decoder.receive_frame(&mut frame) {
            Ok(()) => {
                let mut converted = FrameVideo::empty();
                converter
                    .run(&frame, &mut converted)
                    .wrap_err("Failed to convert the decoded frame")?;
                return Ok(Poll::Frame(frame_to_image(converted)));
            }
            Err(ffmpeg::Error::Other {
                errno: libc::EAGAIN,
            }) => (), // needs another packet
            Err(ffmpeg::Error::Eof) => return Ok(Poll::End),
            Err(e) => {
                return Err(e).wrap_err("Decoder error when receiving a frame from it");
            }
        }

        let mut packet = CodecPacket::empty();
        match packet.read(ictx) {
            Ok(()) if packet.stream() == video_stream_index => {
                if let Err(e) = decoder.send_packet(&packet) {
                    log::warn!("Failed to decode frame: {e}");
                }
            }
            Ok(()) => (),
            Err(ffmpeg::Error::Other {
                errno: libc::EAGAIN,
            }) => return Ok(Poll::Dry),
            Err(ffmpeg::Error::Eof) => {
                decoder
                    .send_eof()
                    .wrap_err("Failed to send EOF to the decoder")?;
            }
            Err(e) => {
                eyre::bail!("Failed to read a packet from the stream: {e}");
            }
        }
    }
}

/// The drain policy of [`FrameSource::latest_frame`]: poll until dry and keep only
/// the newest frame, waiting only when nothing was buffered to begin with.
fn drain_newest(
    mut poll: impl FnMut() -> Result<Poll>,
    mut wait: impl FnMut(),
) -> Result<Option<RgbImage>> {
    let mut newest = None;
    loop {
        match poll()? {
            Poll::Frame(img) => newest = Some(img),
            Poll::End => return Ok(newest),
            Poll::Dry => {
                if newest.is_some() {
                    return Ok(newest);
                }
                wait();
            }
        }
    }
}

fn frame_to_image(converted: FrameVideo) -> RgbImage {
    assert_eq!(Pixel::RGB24, converted.format());
    assert_eq!(1, converted.planes());

    let src_linesize = converted.stride(0);
    let width: usize = converted.width().try_into().expect("will always fit");
    let height: usize = converted.height().try_into().expect("will always fit");
    let data = converted.data(0);
    let trg_linesize = 3 * width;

    // the rows may be padded to some alignment
    let data = if src_linesize == trg_linesize {
        data.to_vec()
    } else {
        assert!(src_linesize >= trg_linesize);
        let mut nopadding = vec![0; trg_linesize * height];
        for i in 0..height {
            nopadding[(i * trg_linesize)..((i + 1) * trg_linesize)].copy_from_slice(
                &data[(i * src_linesize)..(i * src_linesize + trg_linesize)],
            );
        }
        nopadding
    };

    RgbImage::from_vec(
        width.try_into().expect("was an u32 before"),
        height.try_into().expect("was an u32 before"),
        data,
    )
    .expect("the buffer is big enough")
}

fn format_set_nonblocking(input: &mut FormatContext) {
    unsafe {
        let ptr = input.as_mut_ptr();
        if !ptr.is_null() {
            (*ptr).flags |= ffmpeg_sys_next::AVFMT_FLAG_NONBLOCK;
        }
    }
}

fn stream_set_discard_all(stream: &mut ffmpeg::StreamMut<'_>) {
    unsafe {
        let ptr = stream.as_mut_ptr();
        if !ptr.is_null() {
            (*ptr).discard = ffmpeg_sys_next::AVDiscard::AVDISCARD_ALL;
        }
    }
}
