//! Surface materials and the pairwise contact-material table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_MATERIAL_ID: AtomicU32 = AtomicU32::new(0);

/// Identifier of a [`Material`], unique per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MaterialId(pub u32);

/// Surface properties attached to a body or a shape.
///
/// `None` coefficients defer to the contact material resolved for the pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Material {
    /// Unique id used to key the contact-material table.
    pub id: MaterialId,
    /// Human-readable label.
    pub name: String,
    /// Friction coefficient override.
    pub friction: Option<f32>,
    /// Restitution override.
    pub restitution: Option<f32>,
}

impl Material {
    /// Creates a material with a fresh id and no overrides.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MaterialId(NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            friction: None,
            restitution: None,
        }
    }

    /// Sets the friction override.
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = Some(friction);
        self
    }

    /// Sets the restitution override.
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = Some(restitution);
        self
    }
}

/// Contact parameters used when two materials touch.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ContactMaterial {
    /// The two materials this entry applies to, in either order.
    /// `None` for the world default.
    pub materials: Option<(MaterialId, MaterialId)>,
    /// Friction coefficient.
    pub friction: f32,
    /// Restitution (bounciness).
    pub restitution: f32,
    /// Stiffness of produced contact equations.
    pub contact_equation_stiffness: f32,
    /// Relaxation time of produced contact equations, in timesteps.
    pub contact_equation_relaxation: f32,
    /// Stiffness of produced friction equations.
    pub friction_equation_stiffness: f32,
    /// Relaxation time of produced friction equations, in timesteps.
    pub friction_equation_relaxation: f32,
}

impl Default for ContactMaterial {
    fn default() -> Self {
        Self {
            materials: None,
            friction: 0.3,
            restitution: 0.3,
            contact_equation_stiffness: 1e7,
            contact_equation_relaxation: 3.0,
            friction_equation_stiffness: 1e7,
            friction_equation_relaxation: 3.0,
        }
    }
}

impl ContactMaterial {
    /// Creates a contact material for a pair with default parameters.
    pub fn new(a: &Material, b: &Material) -> Self {
        Self {
            materials: Some((a.id, b.id)),
            ..Default::default()
        }
    }

    /// Sets the friction coefficient.
    pub fn with_friction(mut self, friction: f32) -> Self {
        self.friction = friction;
        self
    }

    /// Sets the restitution.
    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    /// Sets stiffness and relaxation of contact equations.
    pub fn with_contact_spook(mut self, stiffness: f32, relaxation: f32) -> Self {
        self.contact_equation_stiffness = stiffness;
        self.contact_equation_relaxation = relaxation;
        self
    }

    /// Sets stiffness and relaxation of friction equations.
    pub fn with_friction_spook(mut self, stiffness: f32, relaxation: f32) -> Self {
        self.friction_equation_stiffness = stiffness;
        self.friction_equation_relaxation = relaxation;
        self
    }
}

/// Sparse symmetric table of contact materials keyed by material-id pair.
#[derive(Debug, Clone, Default)]
pub struct ContactMaterialTable {
    entries: HashMap<(MaterialId, MaterialId), ContactMaterial>,
}

fn ordered(a: MaterialId, b: MaterialId) -> (MaterialId, MaterialId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl ContactMaterialTable {
    /// Inserts (or replaces) an entry. Entries without a material pair are ignored.
    pub fn insert(&mut self, material: ContactMaterial) {
        if let Some((a, b)) = material.materials {
            self.entries.insert(ordered(a, b), material);
        }
    }

    /// Looks up the entry for a pair, in either order.
    pub fn get(&self, a: MaterialId, b: MaterialId) -> Option<&ContactMaterial> {
        self.entries.get(&ordered(a, b))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Material::new("a");
        let b = Material::new("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_lookup_is_symmetric() {
        let ice = Material::new("ice");
        let steel = Material::new("steel");
        let mut table = ContactMaterialTable::default();
        table.insert(ContactMaterial::new(&ice, &steel).with_friction(0.02));
        assert_eq!(table.get(steel.id, ice.id).map(|m| m.friction), Some(0.02));
        assert_eq!(table.get(ice.id, steel.id).map(|m| m.friction), Some(0.02));
        assert!(table.get(ice.id, ice.id).is_none());
    }

    #[test]
    fn test_defaults() {
        let m = ContactMaterial::default();
        assert_eq!(m.friction, 0.3);
        assert_eq!(m.restitution, 0.3);
        assert_eq!(m.contact_equation_stiffness, 1e7);
        assert_eq!(m.contact_equation_relaxation, 3.0);
    }
}
