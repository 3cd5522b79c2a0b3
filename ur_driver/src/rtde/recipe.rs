use std::fmt;

use bytes::Buf;

use crate::{DriverError, Result};

/// Field types a recipe can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtdeDataType {
    Bool,
    Uint8,
    Uint32,
    Uint64,
    Int32,
    Double,
    Vector3d,
    Vector6d,
    Vector6Int32,
    Vector6Uint32,
}

impl RtdeDataType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "BOOL" => Self::Bool,
            "UINT8" => Self::Uint8,
            "UINT32" => Self::Uint32,
            "UINT64" => Self::Uint64,
            "INT32" => Self::Int32,
            "DOUBLE" => Self::Double,
            "VECTOR3D" => Self::Vector3d,
            "VECTOR6D" => Self::Vector6d,
            "VECTOR6INT32" => Self::Vector6Int32,
            "VECTOR6UINT32" => Self::Vector6Uint32,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Uint8 => "UINT8",
            Self::Uint32 => "UINT32",
            Self::Uint64 => "UINT64",
            Self::Int32 => "INT32",
            Self::Double => "DOUBLE",
            Self::Vector3d => "VECTOR3D",
            Self::Vector6d => "VECTOR6D",
            Self::Vector6Int32 => "VECTOR6INT32",
            Self::Vector6Uint32 => "VECTOR6UINT32",
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Bool | Self::Uint8 => 1,
            Self::Uint32 | Self::Int32 => 4,
            Self::Uint64 | Self::Double => 8,
            Self::Vector3d => 24,
            Self::Vector6d => 48,
            Self::Vector6Int32 | Self::Vector6Uint32 => 24,
        }
    }
}

impl fmt::Display for RtdeDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeField {
    pub name: String,
    pub data_type: RtdeDataType,
}

/// Direction a recipe was negotiated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeKind {
    Output,
    Input,
}

/// A negotiated recipe. Immutable for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    /// `None` with protocol version 1, whose packages carry no id.
    pub id: Option<u8>,
    pub kind: RecipeKind,
    pub fields: Vec<RecipeField>,
}

impl Recipe {
    /// Builds the recipe from the robot's setup reply.
    ///
    /// With protocol version 1 the reply carries no recipe id; pass
    /// `with_id = false`.
    pub fn from_setup_reply(
        kind: RecipeKind,
        names: &[String],
        mut payload: &[u8],
        with_id: bool,
    ) -> Result<Self> {
        let id = if with_id {
            if payload.is_empty() {
                return Err(DriverError::Protocol("empty recipe setup reply".to_string()));
            }
            Some(payload.get_u8())
        } else {
            None
        };
        let types = String::from_utf8_lossy(payload);
        let types: Vec<&str> = types.split(',').map(str::trim).collect();
        if types.len() != names.len() {
            return Err(DriverError::Protocol(format!(
                "{kind:?} recipe: requested {} fields, robot answered {} types",
                names.len(),
                types.len()
            )));
        }

        let not_found = offending(names, &types, "NOT_FOUND");
        if !not_found.is_empty() {
            return Err(DriverError::Protocol(format!(
                "{kind:?} recipe: unknown fields {}",
                not_found.join(", ")
            )));
        }
        if kind == RecipeKind::Input {
            let in_use = offending(names, &types, "IN_USE");
            if !in_use.is_empty() {
                return Err(DriverError::Protocol(format!(
                    "input recipe: fields already claimed by another client {}",
                    in_use.join(", ")
                )));
            }
        }

        let fields = names
            .iter()
            .zip(types.iter())
            .map(|(name, ty)| {
                RtdeDataType::parse(ty)
                    .map(|data_type| RecipeField {
                        name: name.clone(),
                        data_type,
                    })
                    .ok_or_else(|| DriverError::Protocol(format!("field {name} has unknown type {ty}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { id, kind, fields })
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn field(&self, name: &str) -> Option<(usize, &RecipeField)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// Encoded size of one data package, recipe id included.
    pub fn package_size(&self) -> usize {
        usize::from(self.id.is_some()) + self.fields.iter().map(|f| f.data_type.size()).sum::<usize>()
    }
}

fn offending(names: &[String], types: &[&str], marker: &str) -> Vec<String> {
    names
        .iter()
        .zip(types)
        .filter(|(_, ty)| **ty == marker)
        .map(|(name, _)| name.clone())
        .collect()
}
