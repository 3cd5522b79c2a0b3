use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{Recipe, RtdeDataType};
use crate::{DriverError, ExtractValue, Result, Vector3d, Vector6Int32, Vector6Uint32, Vector6d};

/// One field value of a data package.
#[derive(Debug, Clone, PartialEq)]
pub enum RtdeValue {
    Bool(bool),
    Uint8(u8),
    Uint32(u32),
    Uint64(u64),
    Int32(i32),
    Double(f64),
    Vector3d(Vector3d),
    Vector6d(Vector6d),
    Vector6Int32(Vector6Int32),
    Vector6Uint32(Vector6Uint32),
}

impl_extract_value!(RtdeValue, Bool, bool);
impl_extract_value!(RtdeValue, Uint8, u8);
impl_extract_value!(RtdeValue, Uint32, u32);
impl_extract_value!(RtdeValue, Uint64, u64);
impl_extract_value!(RtdeValue, Int32, i32);
impl_extract_value!(RtdeValue, Double, f64);
impl_extract_value!(RtdeValue, Vector3d, Vector3d);
impl_extract_value!(RtdeValue, Vector6d, Vector6d);
impl_extract_value!(RtdeValue, Vector6Int32, Vector6Int32);
impl_extract_value!(RtdeValue, Vector6Uint32, Vector6Uint32);

impl RtdeValue {
    pub fn data_type(&self) -> RtdeDataType {
        match self {
            Self::Bool(_) => RtdeDataType::Bool,
            Self::Uint8(_) => RtdeDataType::Uint8,
            Self::Uint32(_) => RtdeDataType::Uint32,
            Self::Uint64(_) => RtdeDataType::Uint64,
            Self::Int32(_) => RtdeDataType::Int32,
            Self::Double(_) => RtdeDataType::Double,
            Self::Vector3d(_) => RtdeDataType::Vector3d,
            Self::Vector6d(_) => RtdeDataType::Vector6d,
            Self::Vector6Int32(_) => RtdeDataType::Vector6Int32,
            Self::Vector6Uint32(_) => RtdeDataType::Vector6Uint32,
        }
    }

    /// Zero value of `data_type`.
    pub fn zero(data_type: RtdeDataType) -> Self {
        match data_type {
            RtdeDataType::Bool => Self::Bool(false),
            RtdeDataType::Uint8 => Self::Uint8(0),
            RtdeDataType::Uint32 => Self::Uint32(0),
            RtdeDataType::Uint64 => Self::Uint64(0),
            RtdeDataType::Int32 => Self::Int32(0),
            RtdeDataType::Double => Self::Double(0.0),
            RtdeDataType::Vector3d => Self::Vector3d([0.0; 3]),
            RtdeDataType::Vector6d => Self::Vector6d([0.0; 6]),
            RtdeDataType::Vector6Int32 => Self::Vector6Int32([0; 6]),
            RtdeDataType::Vector6Uint32 => Self::Vector6Uint32([0; 6]),
        }
    }

    fn decode(data_type: RtdeDataType, buf: &mut impl Buf) -> Self {
        match data_type {
            RtdeDataType::Bool => Self::Bool(buf.get_u8() != 0),
            RtdeDataType::Uint8 => Self::Uint8(buf.get_u8()),
            RtdeDataType::Uint32 => Self::Uint32(buf.get_u32()),
            RtdeDataType::Uint64 => Self::Uint64(buf.get_u64()),
            RtdeDataType::Int32 => Self::Int32(buf.get_i32()),
            RtdeDataType::Double => Self::Double(buf.get_f64()),
            RtdeDataType::Vector3d => Self::Vector3d(std::array::from_fn(|_| buf.get_f64())),
            RtdeDataType::Vector6d => Self::Vector6d(std::array::from_fn(|_| buf.get_f64())),
            RtdeDataType::Vector6Int32 => Self::Vector6Int32(std::array::from_fn(|_| buf.get_i32())),
            RtdeDataType::Vector6Uint32 => Self::Vector6Uint32(std::array::from_fn(|_| buf.get_u32())),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Bool(v) => buf.put_u8(*v as u8),
            Self::Uint8(v) => buf.put_u8(*v),
            Self::Uint32(v) => buf.put_u32(*v),
            Self::Uint64(v) => buf.put_u64(*v),
            Self::Int32(v) => buf.put_i32(*v),
            Self::Double(v) => buf.put_f64(*v),
            Self::Vector3d(v) => v.iter().for_each(|x| buf.put_f64(*x)),
            Self::Vector6d(v) => v.iter().for_each(|x| buf.put_f64(*x)),
            Self::Vector6Int32(v) => v.iter().for_each(|x| buf.put_i32(*x)),
            Self::Vector6Uint32(v) => v.iter().for_each(|x| buf.put_u32(*x)),
        }
    }
}

/// One frame of the cyclic exchange, keyed by the recipe it was built from.
///
/// Once handed to a caller it is owned by that caller; the channel keeps no
/// reference to it.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPackage {
    recipe: Arc<Recipe>,
    values: Vec<RtdeValue>,
}

impl DataPackage {
    /// A package with every field zeroed, ready to be filled for sending.
    pub fn new(recipe: Arc<Recipe>) -> Self {
        let values = recipe.fields.iter().map(|f| RtdeValue::zero(f.data_type)).collect();
        Self { recipe, values }
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn get(&self, name: &str) -> Option<&RtdeValue> {
        self.recipe.field(name).map(|(index, _)| &self.values[index])
    }

    /// Typed read of one field. `None` if the field is not in the recipe or
    /// has another type.
    ///
    /// ```ignore
    /// let q: Option<Vector6d> = package.get_data("actual_q");
    /// ```
    pub fn get_data<T>(&self, name: &str) -> Option<T>
    where
        RtdeValue: ExtractValue<T>,
        T: Clone,
    {
        self.get(name).and_then(|v| v.as_value()).cloned()
    }

    /// Typed write of one field. Fails if the field is missing or the type
    /// does not match.
    pub fn set_data(&mut self, name: &str, value: impl Into<RtdeValue>) -> Result<()> {
        let value = value.into();
        let (index, field) = self
            .recipe
            .field(name)
            .ok_or_else(|| DriverError::InvalidArgument(format!("field {name} is not part of the recipe")))?;
        if field.data_type != value.data_type() {
            return Err(DriverError::InvalidArgument(format!(
                "field {name} is {}, got {}",
                field.data_type,
                value.data_type()
            )));
        }
        self.values[index] = value;
        Ok(())
    }

    /// Decodes a `U` package payload (recipe id included).
    pub fn decode(recipe: Arc<Recipe>, mut payload: &[u8]) -> Result<Self> {
        if payload.len() != recipe.package_size() {
            return Err(DriverError::Protocol(format!(
                "data package of {} bytes, {:?} recipe needs {}",
                payload.len(),
                recipe.kind,
                recipe.package_size()
            )));
        }
        if let Some(expected) = recipe.id {
            let id = payload.get_u8();
            if id != expected {
                return Err(DriverError::Protocol(format!(
                    "data package for recipe {id}, expected {expected}"
                )));
            }
        }
        let values = recipe
            .fields
            .iter()
            .map(|f| RtdeValue::decode(f.data_type, &mut payload))
            .collect();
        Ok(Self { recipe, values })
    }

    /// Encodes the payload of a `U` package (recipe id included).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.recipe.package_size());
        if let Some(id) = self.recipe.id {
            buf.put_u8(id);
        }
        for value in &self.values {
            value.encode(&mut buf);
        }
        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtde::{RecipeField, RecipeKind};

    fn recipe() -> Arc<Recipe> {
        Arc::new(Recipe {
            id: Some(2),
            kind: RecipeKind::Output,
            fields: vec![
                RecipeField {
                    name: "timestamp".into(),
                    data_type: RtdeDataType::Double,
                },
                RecipeField {
                    name: "actual_q".into(),
                    data_type: RtdeDataType::Vector6d,
                },
                RecipeField {
                    name: "robot_mode".into(),
                    data_type: RtdeDataType::Int32,
                },
            ],
        })
    }

    #[test]
    fn test_typed_access() {
        let mut package = DataPackage::new(recipe());
        package.set_data("timestamp", 1.5f64).unwrap();
        package.set_data("actual_q", [0.1f64, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();

        let decoded = DataPackage::decode(recipe(), &package.encode()).unwrap();
        assert_eq!(decoded.get_data::<f64>("timestamp"), Some(1.5));
        assert_eq!(decoded.get_data::<Vector6d>("actual_q").map(|q| q[5]), Some(0.6));
        assert_eq!(decoded.get_data::<f64>("robot_mode"), None);
        assert_eq!(decoded.get_data::<i32>("missing"), None);
    }

    #[test]
    fn test_set_data_checks_type() {
        let mut package = DataPackage::new(recipe());
        assert!(package.set_data("robot_mode", 1.0f64).is_err());
        assert!(package.set_data("nope", 1i32).is_err());
        package.set_data("robot_mode", 7i32).unwrap();
        assert_eq!(package.get("robot_mode"), Some(&RtdeValue::Int32(7)));
    }

    #[test]
    fn test_decode_rejects_wrong_size_and_id() {
        let mut payload = DataPackage::new(recipe()).encode().to_vec();
        payload[0] = 9;
        assert!(matches!(DataPackage::decode(recipe(), &payload), Err(DriverError::Protocol(_))));
        assert!(matches!(DataPackage::decode(recipe(), &payload[1..]), Err(DriverError::Protocol(_))));
    }
}
