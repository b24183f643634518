//! Built-in H.264 writer.
//!
//! Produces a Constrained Baseline Annex B stream in which every macroblock is
//! coded as `I_PCM`. Keyframes are IDR access units carrying SPS and PPS so a
//! decoder that joins mid-stream can start from any of them; every other frame
//! is a non-IDR I slice. The bitrate is high but the stream needs no external
//! library and is accepted by every conforming decoder.

use crate::encoder::bitstream::{BitWriter, nal, write_nal};
use crate::encoder::codec::{CodecPacket, CodecSettings, VideoCodec};
use crate::error::{Error, Result};
use crate::media::YuvPicture;
use bytes::BytesMut;

const PROFILE_BASELINE: u8 = 66;
/// constraint_set0_flag and constraint_set1_flag: Constrained Baseline
const CONSTRAINT_FLAGS: u8 = 0b1100_0000;
const LOG2_MAX_FRAME_NUM: u8 = 16;
const MB_TYPE_I_PCM: u32 = 25;
const SLICE_TYPE_I_ALL: u32 = 7;
/// Bytes of PCM samples per macroblock: 16x16 luma + two 8x8 chroma blocks
const MB_PCM_BYTES: usize = 256 + 64 + 64;

/// (MaxFS in macroblocks, level_idc)
const LEVELS: &[(u32, u8)] = &[
    (99, 10),
    (396, 20),
    (792, 21),
    (1620, 30),
    (3600, 31),
    (5120, 32),
    (8192, 40),
    (8704, 42),
    (22080, 50),
    (36864, 51),
];

pub struct PcmH264Codec {
    width: usize,
    height: usize,
    mb_width: usize,
    mb_height: usize,
    sps: Vec<u8>,
    pps: Vec<u8>,
    frame_num: u32,
    idr_pic_id: u32,
}

impl PcmH264Codec {
    pub fn new(settings: CodecSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 || settings.fps == 0 {
            return Err(Error::Configuration(format!(
                "invalid video settings {}x{} @ {} fps",
                settings.width, settings.height, settings.fps
            )));
        }

        // 4:2:0 cropping works in units of two samples
        let width = settings.width.next_multiple_of(2) as usize;
        let height = settings.height.next_multiple_of(2) as usize;
        let mb_width = width.div_ceil(16);
        let mb_height = height.div_ceil(16);

        let frame_mbs = (mb_width * mb_height) as u32;
        let level = LEVELS
            .iter()
            .find(|(max_fs, _)| frame_mbs <= *max_fs)
            .map(|(_, level)| *level)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "resolution {}x{} exceeds the largest supported level",
                    settings.width, settings.height
                ))
            })?;

        let mut codec = Self {
            width,
            height,
            mb_width,
            mb_height,
            sps: Vec::new(),
            pps: Vec::new(),
            frame_num: 0,
            idr_pic_id: 0,
        };
        codec.sps = codec.build_sps(level, settings.fps);
        codec.pps = Self::build_pps();
        log::debug!(
            "PcmH264Codec: {}x{} ({}x{} MBs), level {}",
            width,
            height,
            mb_width,
            mb_height,
            level
        );
        Ok(codec)
    }

    fn build_sps(&self, level: u8, fps: u32) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_bits(PROFILE_BASELINE as u32, 8);
        w.put_bits(CONSTRAINT_FLAGS as u32, 8);
        w.put_bits(level as u32, 8);
        w.put_ue(0); // seq_parameter_set_id
        w.put_ue((LOG2_MAX_FRAME_NUM - 4) as u32);
        w.put_ue(2); // pic_order_cnt_type: output order follows decode order
        w.put_ue(1); // max_num_ref_frames
        w.put_bit(false); // gaps_in_frame_num_value_allowed_flag
        w.put_ue(self.mb_width as u32 - 1);
        w.put_ue(self.mb_height as u32 - 1);
        w.put_bit(true); // frame_mbs_only_flag
        w.put_bit(true); // direct_8x8_inference_flag

        let crop_right = (self.mb_width * 16 - self.width) / 2;
        let crop_bottom = (self.mb_height * 16 - self.height) / 2;
        if crop_right > 0 || crop_bottom > 0 {
            w.put_bit(true);
            w.put_ue(0);
            w.put_ue(crop_right as u32);
            w.put_ue(0);
            w.put_ue(crop_bottom as u32);
        } else {
            w.put_bit(false);
        }

        // VUI with timing only
        w.put_bit(true);
        w.put_bit(false); // aspect_ratio_info_present_flag
        w.put_bit(false); // overscan_info_present_flag
        w.put_bit(false); // video_signal_type_present_flag
        w.put_bit(false); // chroma_loc_info_present_flag
        w.put_bit(true); // timing_info_present_flag
        w.put_bits(1, 32); // num_units_in_tick
        w.put_bits(fps.saturating_mul(2), 32); // time_scale
        w.put_bit(true); // fixed_frame_rate_flag
        w.put_bit(false); // nal_hrd_parameters_present_flag
        w.put_bit(false); // vcl_hrd_parameters_present_flag
        w.put_bit(false); // pic_struct_present_flag
        w.put_bit(false); // bitstream_restriction_flag

        w.trailing_bits();
        w.finish()
    }

    fn build_pps() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put_ue(0); // pic_parameter_set_id
        w.put_ue(0); // seq_parameter_set_id
        w.put_bit(false); // entropy_coding_mode_flag: CAVLC
        w.put_bit(false); // bottom_field_pic_order_in_frame_present_flag
        w.put_ue(0); // num_slice_groups_minus1
        w.put_ue(0); // num_ref_idx_l0_default_active_minus1
        w.put_ue(0); // num_ref_idx_l1_default_active_minus1
        w.put_bit(false); // weighted_pred_flag
        w.put_bits(0, 2); // weighted_bipred_idc
        w.put_se(0); // pic_init_qp_minus26
        w.put_se(0); // pic_init_qs_minus26
        w.put_se(0); // chroma_qp_index_offset
        w.put_bit(true); // deblocking_filter_control_present_flag
        w.put_bit(false); // constrained_intra_pred_flag
        w.put_bit(false); // redundant_pic_cnt_present_flag
        w.trailing_bits();
        w.finish()
    }

    fn write_slice(&self, picture: &YuvPicture, idr: bool) -> Vec<u8> {
        let mb_count = self.mb_width * self.mb_height;
        let mut w = BitWriter::with_capacity(mb_count * (MB_PCM_BYTES + 2) + 16);

        w.put_ue(0); // first_mb_in_slice
        w.put_ue(SLICE_TYPE_I_ALL);
        w.put_ue(0); // pic_parameter_set_id
        w.put_bits(self.frame_num, LOG2_MAX_FRAME_NUM);
        if idr {
            w.put_ue(self.idr_pic_id);
            w.put_bit(false); // no_output_of_prior_pics_flag
            w.put_bit(false); // long_term_reference_flag
        } else {
            w.put_bit(false); // adaptive_ref_pic_marking_mode_flag
        }
        w.put_se(0); // slice_qp_delta
        w.put_ue(1); // disable_deblocking_filter_idc

        let mut samples = [0u8; MB_PCM_BYTES];
        for mby in 0..self.mb_height {
            for mbx in 0..self.mb_width {
                w.put_ue(MB_TYPE_I_PCM);
                w.align_zero();
                fill_macroblock(picture, mbx, mby, &mut samples);
                w.put_aligned_bytes(&samples);
            }
        }

        w.trailing_bits();
        w.finish()
    }
}

/// Gather the PCM samples of one macroblock: luma raster, then Cb, then Cr.
fn fill_macroblock(picture: &YuvPicture, mbx: usize, mby: usize, out: &mut [u8; MB_PCM_BYTES]) {
    let (x0, y0) = (mbx * 16, mby * 16);
    if x0 + 16 <= picture.width && y0 + 16 <= picture.height {
        for row in 0..16 {
            let src = (y0 + row) * picture.width + x0;
            out[row * 16..row * 16 + 16].copy_from_slice(&picture.y[src..src + 16]);
        }
    } else {
        for row in 0..16 {
            for col in 0..16 {
                out[row * 16 + col] = picture.luma_at(x0 + col, y0 + row);
            }
        }
    }

    let (cx0, cy0) = (mbx * 8, mby * 8);
    for row in 0..8 {
        for col in 0..8 {
            let (u, v) = picture.chroma_at(cx0 + col, cy0 + row);
            out[256 + row * 8 + col] = u;
            out[320 + row * 8 + col] = v;
        }
    }

    // PCM samples equal to zero are disallowed by early decoders
    for sample in out.iter_mut() {
        if *sample == 0 {
            *sample = 1;
        }
    }
}

impl VideoCodec for PcmH264Codec {
    fn name(&self) -> &str {
        "pcm_h264"
    }

    fn encode(
        &mut self,
        picture: &YuvPicture,
        pts: u64,
        force_keyframe: bool,
    ) -> Result<Vec<CodecPacket>> {
        if picture.width.next_multiple_of(2) != self.width
            || picture.height.next_multiple_of(2) != self.height
        {
            return Err(Error::Encode(format!(
                "picture {}x{} does not match session {}x{}",
                picture.width, picture.height, self.width, self.height
            )));
        }

        let idr = force_keyframe;
        if idr {
            self.frame_num = 0;
        }

        let slice = self.write_slice(picture, idr);
        let mut out = BytesMut::with_capacity(slice.len() + slice.len() / 64 + 64);
        if idr {
            write_nal(&mut out, 3, nal::SPS, &self.sps);
            write_nal(&mut out, 3, nal::PPS, &self.pps);
            write_nal(&mut out, 3, nal::IDR, &slice);
            self.idr_pic_id = (self.idr_pic_id + 1) % (1 << 16);
        } else {
            write_nal(&mut out, 3, nal::SLICE, &slice);
        }
        self.frame_num = (self.frame_num + 1) % (1 << LOG2_MAX_FRAME_NUM);

        Ok(vec![CodecPacket {
            data: out.freeze(),
            is_keyframe: idr,
            pts,
        }])
    }

    fn flush(&mut self) -> Result<Vec<CodecPacket>> {
        Ok(Vec::new())
    }
}
