//! Per-pixel kernel math shared by every accelerator.
//!
//! Blend kernels (`Overlay`, `Add`, `Minus`, `Multiply`) take five operands:
//! foreground plane, background plane, foreground alpha, background alpha
//! and the channel maximum as a scalar. They return `[channel, alpha]`.
//!
//! `RemoveColor` takes the R, G, B and alpha planes followed by scalar
//! target R, G, B, tolerance and channel maximum, and returns `[alpha]`.
//!
//! `shaders/kernels.wgsl` mirrors these functions line for line.

use rayon::prelude::*;

use framecut_core::accelerator::{common_len, expect_arity, kernel};
use framecut_core::{FrameCutError, FrameCutResult, Operand};

/// Top alpha at or below this shows the background untouched.
pub const TRANSPARENT_THRESHOLD: f32 = 0.05;

/// Output alpha below this is treated as fully transparent.
pub const ALPHA_EPSILON: f32 = 1e-6;

pub type BlendFn = fn(f32, f32, f32, f32, f32) -> (f32, f32);

/// Alpha-over of `fg` onto `bg` for one channel sample.
pub fn overlay(fg: f32, bg: f32, fg_a: f32, bg_a: f32, max: f32) -> (f32, f32) {
    if fg_a >= 1.0 {
        return (fg, 1.0);
    }
    if fg_a <= TRANSPARENT_THRESHOLD {
        return (bg, bg_a);
    }
    let out_a = fg_a + bg_a * (1.0 - fg_a);
    if out_a < ALPHA_EPSILON {
        return (0.0, 0.0);
    }
    let c = fg * fg_a / out_a + bg * bg_a * (1.0 - fg_a) / out_a;
    (c.clamp(0.0, max).trunc(), out_a)
}

pub fn add(fg: f32, bg: f32, fg_a: f32, bg_a: f32, max: f32) -> (f32, f32) {
    ((fg + bg).clamp(0.0, max).trunc(), fg_a.max(bg_a))
}

/// Background minus foreground, floored at zero.
pub fn minus(fg: f32, bg: f32, fg_a: f32, bg_a: f32, max: f32) -> (f32, f32) {
    ((bg - fg).clamp(0.0, max).trunc(), fg_a.max(bg_a))
}

pub fn multiply(fg: f32, bg: f32, fg_a: f32, bg_a: f32, max: f32) -> (f32, f32) {
    if max <= 0.0 {
        return (0.0, fg_a.max(bg_a));
    }
    let c = fg * bg / max;
    (c.clamp(0.0, max).trunc(), fg_a.max(bg_a))
}

/// Inclusive `[target - tolerance, target + tolerance]`, clamped to `[0, max]`.
pub fn key_range(target: f32, tolerance: f32, max: f32) -> (f32, f32) {
    (
        (target - tolerance).clamp(0.0, max),
        (target + tolerance).clamp(0.0, max),
    )
}

/// Alpha after chroma keying one pixel.
pub fn remove_color(rgb: [f32; 3], alpha: f32, ranges: &[(f32, f32); 3]) -> f32 {
    let keyed = rgb
        .iter()
        .zip(ranges.iter())
        .all(|(&v, &(lo, hi))| v >= lo && v <= hi);
    if keyed {
        0.0
    } else {
        alpha
    }
}

pub fn blend_fn(name: &str) -> Option<BlendFn> {
    match name {
        kernel::OVERLAY => Some(overlay),
        kernel::ADD => Some(add),
        kernel::MINUS => Some(minus),
        kernel::MULTIPLY => Some(multiply),
        _ => None,
    }
}

/// Run `name` over the operands on the CPU. With `parallel` the pixel range
/// is split across the rayon pool.
pub fn run(name: &str, operands: &[Operand<'_>], parallel: bool) -> FrameCutResult<Vec<Vec<f32>>> {
    if let Some(f) = blend_fn(name) {
        return run_blend(name, f, operands, parallel);
    }
    if name == kernel::REMOVE_COLOR {
        return run_remove_color(operands, parallel);
    }
    Err(FrameCutError::unsupported(format!("unknown kernel `{name}`")))
}

fn run_blend(
    name: &str,
    f: BlendFn,
    operands: &[Operand<'_>],
    parallel: bool,
) -> FrameCutResult<Vec<Vec<f32>>> {
    expect_arity(name, operands, 5)?;
    let fg = operands[0].as_plane(0)?;
    let bg = operands[1].as_plane(1)?;
    let fg_a = operands[2].as_plane(2)?;
    let bg_a = operands[3].as_plane(3)?;
    let max = operands[4].as_scalar(4)?;
    let len = common_len(&[fg, bg, fg_a, bg_a])?;

    let mut out = vec![0.0f32; len];
    let mut out_a = vec![0.0f32; len];
    let pixel = |i: usize, o: &mut f32, oa: &mut f32| {
        let (c, a) = f(fg[i], bg[i], fg_a[i], bg_a[i], max);
        *o = c;
        *oa = a;
    };
    if parallel {
        out.par_iter_mut()
            .zip(out_a.par_iter_mut())
            .enumerate()
            .for_each(|(i, (o, oa))| pixel(i, o, oa));
    } else {
        out.iter_mut()
            .zip(out_a.iter_mut())
            .enumerate()
            .for_each(|(i, (o, oa))| pixel(i, o, oa));
    }
    Ok(vec![out, out_a])
}

fn run_remove_color(operands: &[Operand<'_>], parallel: bool) -> FrameCutResult<Vec<Vec<f32>>> {
    expect_arity(kernel::REMOVE_COLOR, operands, 9)?;
    let r = operands[0].as_plane(0)?;
    let g = operands[1].as_plane(1)?;
    let b = operands[2].as_plane(2)?;
    let a = operands[3].as_plane(3)?;
    let target = [
        operands[4].as_scalar(4)?,
        operands[5].as_scalar(5)?,
        operands[6].as_scalar(6)?,
    ];
    let tolerance = operands[7].as_scalar(7)?;
    let max = operands[8].as_scalar(8)?;
    let len = common_len(&[r, g, b, a])?;
    let ranges = target.map(|t| key_range(t, tolerance, max));

    let mut out = vec![0.0f32; len];
    let pixel = |i: usize, o: &mut f32| *o = remove_color([r[i], g[i], b[i]], a[i], &ranges);
    if parallel {
        out.par_iter_mut().enumerate().for_each(|(i, o)| pixel(i, o));
    } else {
        out.iter_mut().enumerate().for_each(|(i, o)| pixel(i, o));
    }
    Ok(vec![out])
}
