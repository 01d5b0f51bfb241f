use std::f32::consts::SQRT_2;

use glam::Quat;

/// Probabilities are clamped to this distance from 0 and 1 before taking a logit.
const LOGIT_EPSILON: f32 = 1.0e-6;

/// Alpha byte values 252..=255 select which quaternion component was dropped.
pub const QUAT_MODE_BASE: u8 = 252;

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

pub fn logit(p: f32) -> f32 {
    let p = p.clamp(LOGIT_EPSILON, 1.0 - LOGIT_EPSILON);
    (p / (1.0 - p)).ln()
}

/// Symmetric log transform applied to positions before quantization.
pub fn log_transform(value: f32) -> f32 {
    value.signum() * (value.abs() + 1.0).ln()
}

pub fn inv_log_transform(value: f32) -> f32 {
    value.signum() * (value.abs().exp() - 1.0)
}

pub fn encode_u16(value: f32, min: f32, max: f32) -> u16 {
    let range = max - min;
    if !(range > 0.0) || !value.is_finite() {
        return 0;
    }
    (65535.0 * (value - min) / range).round().clamp(0.0, 65535.0) as u16
}

pub fn decode_u16(value: u16, min: f32, max: f32) -> f32 {
    min + (max - min) * (value as f32 / 65535.0)
}

pub fn encode_alpha8(logit_opacity: f32) -> u8 {
    (255.0 * sigmoid(logit_opacity)).round().clamp(0.0, 255.0) as u8
}

pub fn decode_alpha8(alpha: u8) -> f32 {
    logit(alpha as f32 / 255.0)
}

fn encode_unorm8(value: f32) -> u8 {
    (255.0 * (value * 0.5 + 0.5)).round().clamp(0.0, 255.0) as u8
}

fn decode_unorm8(value: u8) -> f32 {
    (value as f32 / 255.0 - 0.5) * 2.0 / SQRT_2
}

/// Smallest-three quaternion encoding. Components are stored in `w, x, y, z`
/// order; RGB carries the three smaller components and alpha `252 + index`
/// of the dropped largest one.
pub fn encode_quat_smallest3(quat: Quat) -> [u8; 4] {
    let length = quat.length();
    let quat = if length > 0.0 && length.is_finite() { quat / length } else { Quat::IDENTITY };
    let mut q = [quat.w, quat.x, quat.y, quat.z];

    let mut largest = 0;
    for i in 1..4 {
        if q[i].abs() > q[largest].abs() {
            largest = i;
        }
    }

    if q[largest] < 0.0 {
        q = q.map(|v| -v);
    }
    let q = q.map(|v| v * SQRT_2);

    let mut encoded = [0u8; 4];
    let mut channel = 0;
    for (i, &v) in q.iter().enumerate() {
        if i != largest {
            encoded[channel] = encode_unorm8(v);
            channel += 1;
        }
    }
    encoded[3] = QUAT_MODE_BASE + largest as u8;
    encoded
}

/// Inverse of `encode_quat_smallest3`. Returns `None` when the alpha byte is
/// not a valid mode.
pub fn decode_quat_smallest3(encoded: [u8; 4]) -> Option<Quat> {
    if encoded[3] < QUAT_MODE_BASE {
        return None;
    }
    let largest = (encoded[3] - QUAT_MODE_BASE) as usize;
    let small = [decode_unorm8(encoded[0]), decode_unorm8(encoded[1]), decode_unorm8(encoded[2])];
    let omitted = (1.0 - small.iter().map(|v| v * v).sum::<f32>()).max(0.0).sqrt();

    let mut q = [0.0f32; 4];
    let mut channel = 0;
    for (i, value) in q.iter_mut().enumerate() {
        if i == largest {
            *value = omitted;
        } else {
            *value = small[channel];
            channel += 1;
        }
    }
    let [w, x, y, z] = q;
    Some(Quat::from_xyzw(x, y, z, w))
}
