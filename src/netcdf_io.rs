//! NetCDF I/O helpers shared by all tools
//!
//! Reading variables into `ndarray` arrays, writing per-record blocks,
//! copying attributes between files and a small writer for CF-style grid
//! output files.

use crate::errors::{NoahMpError, Result};
use ndarray::{ArrayD, IxDyn};
use netcdf::types::NcVariableType;
use netcdf::{Attribute, AttributeValue, File, FileMut, NcTypeDescriptor, Variable, VariableMut};
use std::{fs, path::Path};
use tracing::warn;

/// Deflate level used for every variable this crate creates.
pub const DEFLATE_LEVEL: i32 = 6;

/// Expands a block given as per-dimension ranges into the tuple form the
/// netcdf crate accepts, then evaluates `$body` with it bound to `$e`.
macro_rules! with_block {
    ($ranges:expr, |$e:ident| $body:expr) => {{
        let r: &[std::ops::Range<usize>] = $ranges;
        match r.len() {
            0 => {
                let $e = ..;
                $body
            }
            1 => {
                let $e = r[0].clone();
                $body
            }
            2 => {
                let $e = (r[0].clone(), r[1].clone());
                $body
            }
            3 => {
                let $e = (r[0].clone(), r[1].clone(), r[2].clone());
                $body
            }
            4 => {
                let $e = (r[0].clone(), r[1].clone(), r[2].clone(), r[3].clone());
                $body
            }
            5 => {
                let $e = (
                    r[0].clone(),
                    r[1].clone(),
                    r[2].clone(),
                    r[3].clone(),
                    r[4].clone(),
                );
                $body
            }
            n => Err(NoahMpError::UnsupportedLayout {
                message: format!("{} dimensions (max 5)", n),
            }),
        }
    }};
}

/// Storage class of a variable, as far as these tools care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Double,
    Int,
    Short,
    Byte,
    Char,
    Other,
}

impl ValueKind {
    pub fn of(var: &Variable) -> Self {
        let name = format!("{:?}", var.vartype()).to_lowercase();
        if name.contains("f64") || name.contains("double") {
            ValueKind::Double
        } else if name.contains("f32") || name.contains("float") {
            ValueKind::Float
        } else if name.contains("i16") || name.contains("short") {
            ValueKind::Short
        } else if name.contains("i32") || name == "int" {
            ValueKind::Int
        } else if name.contains("char") {
            ValueKind::Char
        } else if name.contains("i8") || name.contains("u8") || name.contains("byte") {
            ValueKind::Byte
        } else {
            ValueKind::Other
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }
}

/// Values of a whole variable, keeping the on-disk type.
#[derive(Debug, Clone, PartialEq)]
pub enum GridValues {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I16(Vec<i16>),
    I8(Vec<i8>),
}

impl GridValues {
    /// Reads all values of `var`; character and user-defined types are rejected.
    pub fn read(var: &Variable) -> Result<Self> {
        Ok(match ValueKind::of(var) {
            ValueKind::Float => GridValues::F32(var.get_values::<f32, _>(..)?),
            ValueKind::Double => GridValues::F64(var.get_values::<f64, _>(..)?),
            ValueKind::Int => GridValues::I32(var.get_values::<i32, _>(..)?),
            ValueKind::Short => GridValues::I16(var.get_values::<i16, _>(..)?),
            ValueKind::Byte => GridValues::I8(var.get_values::<i8, _>(..)?),
            ValueKind::Char | ValueKind::Other => {
                return Err(NoahMpError::UnsupportedLayout {
                    message: format!("variable '{}' has a non-numeric type", var.name()),
                })
            }
        })
    }

    /// Defines a variable of the same type in `file`.
    pub fn define<'f>(
        &self,
        file: &'f mut FileMut,
        name: &str,
        dims: &[&str],
    ) -> Result<VariableMut<'f>> {
        define_variable(file, self.kind(), name, dims)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            GridValues::F32(_) => ValueKind::Float,
            GridValues::F64(_) => ValueKind::Double,
            GridValues::I32(_) => ValueKind::Int,
            GridValues::I16(_) => ValueKind::Short,
            GridValues::I8(_) => ValueKind::Byte,
        }
    }

    /// Writes the values into the block `start`/`count`.
    pub fn put(&self, var: &mut VariableMut, start: &[usize], count: &[usize]) -> Result<()> {
        let ranges = block_ranges(start, count);
        match self {
            GridValues::F32(v) => with_block!(&ranges, |e| Ok(var.put_values(v, e)?)),
            GridValues::F64(v) => with_block!(&ranges, |e| Ok(var.put_values(v, e)?)),
            GridValues::I32(v) => with_block!(&ranges, |e| Ok(var.put_values(v, e)?)),
            GridValues::I16(v) => with_block!(&ranges, |e| Ok(var.put_values(v, e)?)),
            GridValues::I8(v) => with_block!(&ranges, |e| Ok(var.put_values(v, e)?)),
        }
    }

    /// Sets the fill value, converted to the variable's type.
    pub fn set_fill(&self, var: &mut VariableMut, fill: f64) -> Result<()> {
        match self {
            GridValues::F32(_) => var.set_fill_value(fill as f32)?,
            GridValues::F64(_) => var.set_fill_value(fill)?,
            GridValues::I32(_) => var.set_fill_value(fill as i32)?,
            GridValues::I16(_) => var.set_fill_value(fill as i16)?,
            GridValues::I8(_) => var.set_fill_value(fill as i8)?,
        }
        Ok(())
    }
}

/// Defines a variable of the given storage class.
pub fn define_variable<'f>(
    file: &'f mut FileMut,
    kind: ValueKind,
    name: &str,
    dims: &[&str],
) -> Result<VariableMut<'f>> {
    Ok(match kind {
        ValueKind::Float => file.add_variable::<f32>(name, dims)?,
        ValueKind::Double => file.add_variable::<f64>(name, dims)?,
        ValueKind::Int => file.add_variable::<i32>(name, dims)?,
        ValueKind::Short => file.add_variable::<i16>(name, dims)?,
        ValueKind::Byte => file.add_variable::<i8>(name, dims)?,
        ValueKind::Char | ValueKind::Other => {
            return Err(NoahMpError::UnsupportedLayout {
                message: format!("cannot define non-numeric variable '{}'", name),
            })
        }
    })
}

/// Writes `f64` values into the block `start`/`count`; the library converts
/// them to the variable's type.
pub fn put_block_f64(
    var: &mut VariableMut,
    start: &[usize],
    count: &[usize],
    values: &[f64],
) -> Result<()> {
    let ranges = block_ranges(start, count);
    with_block!(&ranges, |e| Ok(var.put_values(values, e)?))
}

fn block_ranges(start: &[usize], count: &[usize]) -> Vec<std::ops::Range<usize>> {
    start
        .iter()
        .zip(count)
        .map(|(&s, &c)| s..s + c)
        .collect()
}

/// Looks a variable up, failing with [`NoahMpError::VariableNotFound`].
pub fn variable<'f>(file: &'f File, name: &str) -> Result<Variable<'f>> {
    file.variable(name)
        .ok_or_else(|| NoahMpError::VariableNotFound {
            var: name.to_string(),
        })
}

/// Mutable counterpart of [`variable`].
pub fn variable_mut<'f>(file: &'f mut FileMut, name: &str) -> Result<VariableMut<'f>> {
    file.variable_mut(name)
        .ok_or_else(|| NoahMpError::VariableNotFound {
            var: name.to_string(),
        })
}

pub fn dimension_len(file: &File, name: &str) -> Result<usize> {
    file.dimension(name)
        .map(|d| d.len())
        .ok_or_else(|| NoahMpError::DimensionNotFound {
            dim: name.to_string(),
        })
}

pub fn dimension_names(var: &Variable) -> Vec<String> {
    var.dimensions().iter().map(|d| d.name().to_string()).collect()
}

pub fn shape(var: &Variable) -> Vec<usize> {
    var.dimensions().iter().map(|d| d.len()).collect()
}

/// Loads a variable as `f32` with its on-disk shape.
pub fn read_array(var: &Variable) -> Result<ArrayD<f32>> {
    let data = var.get_values::<f32, _>(..)?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape(var)), data)?)
}

/// Loads a variable as `f64` with its on-disk shape.
pub fn read_array_f64(var: &Variable) -> Result<ArrayD<f64>> {
    let data = var.get_values::<f64, _>(..)?;
    Ok(ArrayD::from_shape_vec(IxDyn(&shape(var)), data)?)
}

/// Writes `data` as record `index` along the first dimension.
pub fn put_record(var: &mut VariableMut, index: usize, data: &ArrayD<f32>) -> Result<()> {
    let mut start = vec![index];
    start.extend(std::iter::repeat(0).take(data.ndim()));
    let mut count = vec![1];
    count.extend_from_slice(data.shape());
    let values: Vec<f32> = data.iter().copied().collect();
    let ranges = block_ranges(&start, &count);
    with_block!(&ranges, |e| Ok(var.put_values(&values, e)?))
}

/// Writes a whole `f32` array into a variable of the same shape.
pub fn put_array(var: &mut VariableMut, data: &ArrayD<f32>) -> Result<()> {
    let start = vec![0; data.ndim()];
    let values: Vec<f32> = data.iter().copied().collect();
    let ranges = block_ranges(&start, data.shape());
    with_block!(&ranges, |e| Ok(var.put_values(&values, e)?))
}

/// Writes a whole `f64` array into a variable of the same shape.
pub fn put_array_f64(var: &mut VariableMut, data: &ArrayD<f64>) -> Result<()> {
    let start = vec![0; data.ndim()];
    let values: Vec<f64> = data.iter().copied().collect();
    let ranges = block_ranges(&start, data.shape());
    with_block!(&ranges, |e| Ok(var.put_values(&values, e)?))
}

/// Writes a 1-D `f64` series starting at index 0.
pub fn put_series(var: &mut VariableMut, values: &[f64]) -> Result<()> {
    Ok(var.put_values(values, 0..values.len())?)
}

/// Writes a 1-D `f32` series starting at index 0.
pub fn put_series_f32(var: &mut VariableMut, values: &[f32]) -> Result<()> {
    Ok(var.put_values(values, 0..values.len())?)
}

/// One element of an `NC_CHAR` variable such as the WRF `Times` array.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NcChar(pub u8);

// SAFETY: `NcChar` is a transparent single byte, the size of `NC_CHAR`.
unsafe impl NcTypeDescriptor for NcChar {
    fn type_descriptor() -> NcVariableType {
        NcVariableType::Char
    }
}

/// Overwrites record `index` of a `(record, strlen)` character variable
/// with `text`, NUL-padded to the record width.
pub fn put_text_record(var: &mut VariableMut, index: usize, text: &str) -> Result<()> {
    let width = match var.dimensions() {
        [_, strlen] => strlen.len(),
        dims => {
            return Err(NoahMpError::UnsupportedLayout {
                message: format!("'{}' has {} dimensions, expected 2", var.name(), dims.len()),
            })
        }
    };
    if text.len() > width {
        return Err(NoahMpError::UnsupportedLayout {
            message: format!("'{}' does not fit in {} characters", text, width),
        });
    }
    let mut record = vec![NcChar::default(); width];
    for (slot, byte) in record.iter_mut().zip(text.bytes()) {
        *slot = NcChar(byte);
    }
    Ok(var.put_values(&record, (index..index + 1, 0..width))?)
}

pub fn string_value(attr: Option<Attribute>) -> Option<String> {
    match attr?.value().ok()? {
        AttributeValue::Str(s) => Some(s),
        AttributeValue::Strs(ss) => ss.into_iter().next(),
        _ => None,
    }
}

pub fn numeric_value(attr: Option<Attribute>) -> Option<f64> {
    match attr?.value().ok()? {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Doubles(v) => v.first().copied(),
        AttributeValue::Floats(v) => v.first().map(|&x| x as f64),
        AttributeValue::Ints(v) => v.first().map(|&x| x as f64),
        AttributeValue::Shorts(v) => v.first().map(|&x| x as f64),
        _ => None,
    }
}

/// String attribute of a variable, required.
pub fn required_string(var: &Variable, name: &str) -> Result<String> {
    string_value(var.attribute(name)).ok_or_else(|| NoahMpError::AttributeNotFound {
        name: format!("{}:{}", var.name(), name),
    })
}

/// Copies every attribute of `src` onto `dst` except the names in `skip`.
pub fn copy_attributes(src: &Variable, dst: &mut VariableMut, skip: &[&str]) -> Result<()> {
    for attr in src.attributes().filter(|a| !skip.contains(&a.name())) {
        match attr.value() {
            Ok(value) => {
                dst.put_attribute(attr.name(), value)?;
            }
            Err(e) => warn!("skipped unreadable attribute '{}': {}", attr.name(), e),
        }
    }
    Ok(())
}

/// Copies the named global attributes, warning about names that are absent.
pub fn copy_global_attributes(src: &File, dst: &mut FileMut, names: &[&str]) -> Result<()> {
    for &name in names {
        match src.attribute(name).map(|a| a.value()) {
            Some(Ok(value)) => {
                dst.add_attribute(name, value)?;
            }
            _ => warn!("unknown global attribute name: {}", name),
        }
    }
    Ok(())
}

/// Static description of one output field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub units: &'static str,
    pub standard_name: Option<&'static str>,
    pub long_name: &'static str,
}

/// Writer for CF-style `(time, [depth,] lat, lon)` grid files.
pub struct CfWriter {
    file: FileMut,
}

impl CfWriter {
    /// Create a new output file, replacing any existing one.
    pub fn create(output_path: &Path) -> Result<Self> {
        if output_path.exists() {
            fs::remove_file(output_path)?;
        }
        Ok(Self {
            file: netcdf::create(output_path)?,
        })
    }

    pub fn file_mut(&mut self) -> &mut FileMut {
        &mut self.file
    }

    pub fn global_attributes(&mut self, attrs: &[(&str, &str)]) -> Result<()> {
        for &(name, value) in attrs {
            self.file.add_attribute(name, value)?;
        }
        Ok(())
    }

    pub fn dimension(&mut self, name: &str, len: Option<usize>) -> Result<()> {
        match len {
            Some(len) => self.file.add_dimension(name, len)?,
            None => self.file.add_unlimited_dimension(name)?,
        };
        Ok(())
    }

    /// Defines a deflated `f64` coordinate and, when given, writes its values.
    pub fn coordinate(
        &mut self,
        name: &str,
        dims: &[&str],
        attrs: &[(&str, String)],
        values: Option<&[f64]>,
    ) -> Result<()> {
        let mut var = self.file.add_variable::<f64>(name, dims)?;
        var.set_compression(DEFLATE_LEVEL, false)?;
        for (attr, value) in attrs {
            var.put_attribute(attr, value.as_str())?;
        }
        if let Some(values) = values {
            put_series(&mut var, values)?;
        }
        Ok(())
    }

    /// Defines a deflated `f32` field with a NaN fill value.
    pub fn field(&mut self, spec: &FieldSpec, dims: &[&str]) -> Result<()> {
        let mut var = self.file.add_variable::<f32>(spec.name, dims)?;
        var.set_compression(DEFLATE_LEVEL, false)?;
        var.set_fill_value(f32::NAN)?;
        var.put_attribute("units", spec.units)?;
        if let Some(standard_name) = spec.standard_name {
            var.put_attribute("standard_name", standard_name)?;
        }
        var.put_attribute("long_name", spec.long_name)?;
        Ok(())
    }

    pub fn put_time(&mut self, index: usize, value: f64) -> Result<()> {
        let mut var = variable_mut(&mut self.file, "time")?;
        var.put_values(&[value], index..index + 1)?;
        Ok(())
    }

    pub fn put_record(&mut self, name: &str, index: usize, data: &ArrayD<f32>) -> Result<()> {
        let mut var = variable_mut(&mut self.file, name)?;
        put_record(&mut var, index, data)
    }
}
