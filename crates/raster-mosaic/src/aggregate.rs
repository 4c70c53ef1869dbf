//! Nodata-aware overlap resolution.
//!
//! Each [`AggregationMethod`] variant maps to one reduction over the valid
//! (non-nodata) values stacked at a pixel. A pixel with no valid
//! contributors always resolves to nodata, whatever the method.

use num_traits::{Bounded, ToPrimitive};

use crate::config::AggregationMethod;
use crate::types::PixelType;

/// Whether `value` is the nodata sentinel.
///
/// Exact comparison, no epsilon. A NaN sentinel matches NaN values.
#[inline]
pub fn is_nodata(value: f64, nodata: f64) -> bool {
    if nodata.is_nan() {
        value.is_nan()
    } else {
        value == nodata
    }
}

/// Reduce one band across a stack of candidate layers into `out`.
///
/// Every layer and `out` must have the same length. Layers are ordered by
/// candidate submission order, which `first`/`last` rely on.
pub fn reduce_band(method: AggregationMethod, layers: &[&[f64]], nodata: f64, out: &mut [f64]) {
    debug_assert!(layers.iter().all(|l| l.len() == out.len()));

    let reducer: fn(&mut dyn Iterator<Item = f64>) -> Option<f64> = match method {
        AggregationMethod::Mean => mean_of,
        AggregationMethod::Max => max_of,
        AggregationMethod::Min => min_of,
        AggregationMethod::Sum => sum_of,
        AggregationMethod::First => first_of,
        AggregationMethod::Last => last_of,
    };

    for (i, slot) in out.iter_mut().enumerate() {
        let mut valid = layers
            .iter()
            .map(|layer| layer[i])
            .filter(|&v| !is_nodata(v, nodata));
        *slot = reducer(&mut valid).unwrap_or(nodata);
    }
}

/// Arithmetic mean of valid values.
fn mean_of(values: &mut dyn Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in values {
        sum += v;
        count += 1;
    }
    (count > 0).then(|| sum / count as f64)
}

fn max_of(values: &mut dyn Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
}

fn min_of(values: &mut dyn Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.min(v))))
}

fn sum_of(values: &mut dyn Iterator<Item = f64>) -> Option<f64> {
    values.fold(None, |acc: Option<f64>, v| Some(acc.unwrap_or(0.0) + v))
}

fn first_of(values: &mut dyn Iterator<Item = f64>) -> Option<f64> {
    values.next()
}

fn last_of(values: &mut dyn Iterator<Item = f64>) -> Option<f64> {
    values.last()
}

/// Cast a working value to what `pixel_type` can store.
///
/// Integer types round to nearest and saturate at the type's range;
/// `float32` loses precision the way a store would.
pub fn cast_to(pixel_type: PixelType, value: f64) -> f64 {
    match pixel_type {
        PixelType::UInt8 => saturate::<u8>(value),
        PixelType::Int16 => saturate::<i16>(value),
        PixelType::UInt16 => saturate::<u16>(value),
        PixelType::Int32 => saturate::<i32>(value),
        PixelType::UInt32 => saturate::<u32>(value),
        PixelType::Float32 => value as f32 as f64,
        PixelType::Float64 => value,
    }
}

fn saturate<T: Bounded + ToPrimitive>(value: f64) -> f64 {
    let lo = T::min_value().to_f64().unwrap_or(f64::MIN);
    let hi = T::max_value().to_f64().unwrap_or(f64::MAX);
    if value.is_nan() {
        return 0.0;
    }
    value.round().clamp(lo, hi)
}

/// Cast a whole buffer in place.
pub fn cast_slice(pixel_type: PixelType, data: &mut [f64]) {
    if pixel_type == PixelType::Float64 {
        return;
    }
    for v in data.iter_mut() {
        *v = cast_to(pixel_type, *v);
    }
}
