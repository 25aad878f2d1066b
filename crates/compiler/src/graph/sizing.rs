//! Output size expressions
//!
//! A `source`-relative pass inherits the policy of the pass before it, so the size of
//! every output can be written as a base (original input, viewport or a fixed count)
//! followed by the chain of factors applied to it. Two outputs with equal expressions
//! always resolve to the same pixel size, which is what target sharing relies on.

use crate::preset::{AxisScale, PassScale, ScaleFactor, ScaleType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A size in pixels
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// `[width, height, 1/width, 1/height]`, the layout of `*Size` uniforms
    pub fn to_vec4(&self) -> [f32; 4] {
        let (w, h) = (self.width.max(1) as f32, self.height.max(1) as f32);
        [w, h, 1.0 / w, 1.0 / h]
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What an axis expression is measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SizeBase {
    Original,
    Viewport,
    Absolute(u32),
}

/// Size of one axis: a base and the factors applied to it in order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AxisExpr {
    pub base: SizeBase,
    /// Non-unity factors, innermost first
    pub factors: Vec<ScaleFactor>,
}

impl AxisExpr {
    fn new(base: SizeBase) -> Self {
        Self { base, factors: Vec::new() }
    }

    fn scaled(mut self, factor: ScaleFactor) -> Self {
        if !factor.is_unity() {
            self.factors.push(factor);
        }
        self
    }

    pub fn resolve(&self, original: u32, viewport: u32) -> u32 {
        let base = match self.base {
            SizeBase::Original => original,
            SizeBase::Viewport => viewport,
            SizeBase::Absolute(pixels) => pixels,
        };
        self.factors.iter().fold(base.max(1), |size, factor| factor.apply(size))
    }

    /// Returns true if the size follows the original input or the viewport
    pub fn is_relative(&self) -> bool {
        !matches!(self.base, SizeBase::Absolute(_))
    }
}

/// Size expression of a pass output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SizeExpr {
    pub x: AxisExpr,
    pub y: AxisExpr,
}

impl SizeExpr {
    pub fn resolve(&self, original: Size, viewport: Size) -> Size {
        Size::new(self.x.resolve(original.width, viewport.width), self.y.resolve(original.height, viewport.height))
    }

    pub fn is_relative(&self) -> bool {
        self.x.is_relative() || self.y.is_relative()
    }

    /// Returns true if the expression is exactly the viewport size
    pub fn is_viewport(&self) -> bool {
        [&self.x, &self.y].iter().all(|axis| axis.base == SizeBase::Viewport && axis.factors.is_empty())
    }
}

/// A scale policy that cannot produce a usable size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidScale {
    pub pass_index: usize,
    pub axis: char,
    pub reason: String,
}

fn axis_expr(pass_index: usize, axis: char, scale: &AxisScale, source: &AxisExpr) -> Result<AxisExpr, InvalidScale> {
    let invalid = |reason: String| InvalidScale { pass_index, axis, reason };
    if scale.factor.is_zero() {
        return Err(invalid(format!("zero {} scale", scale.scale_type.as_str())));
    }
    Ok(match scale.scale_type {
        ScaleType::Source => source.clone().scaled(scale.factor),
        ScaleType::Original => AxisExpr::new(SizeBase::Original).scaled(scale.factor),
        ScaleType::Viewport => AxisExpr::new(SizeBase::Viewport).scaled(scale.factor),
        ScaleType::Absolute => {
            if !scale.factor.is_integer() {
                return Err(invalid(format!("fractional absolute size {}", scale.factor)));
            }
            AxisExpr::new(SizeBase::Absolute(scale.factor.numerator))
        }
    })
}

/// Builds the size expression of every pass in document order
///
/// `source` scaling follows the previous pass in the document, or the original input
/// for the first pass.
pub fn size_exprs(scales: &[PassScale]) -> Result<Vec<SizeExpr>, InvalidScale> {
    let mut exprs: Vec<SizeExpr> = Vec::with_capacity(scales.len());
    let original = SizeExpr {
        x: AxisExpr::new(SizeBase::Original),
        y: AxisExpr::new(SizeBase::Original),
    };
    for (pass_index, scale) in scales.iter().enumerate() {
        let source = exprs.last().unwrap_or(&original);
        let expr = SizeExpr {
            x: axis_expr(pass_index, 'x', &scale.x, &source.x)?,
            y: axis_expr(pass_index, 'y', &scale.y, &source.y)?,
        };
        exprs.push(expr);
    }
    Ok(exprs)
}
