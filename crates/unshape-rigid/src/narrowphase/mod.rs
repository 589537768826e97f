//! Contact generation for candidate body pairs.
//!
//! For every shape pair that survives filtering, the pair is ordered by
//! [`ShapeKind::bits`](crate::shape::ShapeKind::bits) (lower tag first, called A) and dispatched to a
//! handler. Handlers append contact equations whose normal points from A to
//! B, plus two friction equations per contact when the pair has friction.

mod convex;
mod sphere;
mod trimesh;

use glam::{Quat, Vec3};
use tracing::trace;

use crate::body::{Body, BodyType};
use crate::equation::{Equation, EquationKind};
use crate::material::{ContactMaterial, ContactMaterialTable, Material};
use crate::math::Vec3Ext;
use crate::shape::{Shape, ShapeGeometry, ShapeId};

/// Upper bound on contact impulses.
const CONTACT_MAX_FORCE: f32 = 1e6;

/// World state the narrowphase reads.
#[derive(Debug, Clone, Copy)]
pub struct NarrowphaseContext<'a> {
    pub bodies: &'a [Body],
    pub contact_materials: &'a ContactMaterialTable,
    pub default_material: &'a ContactMaterial,
    /// Gravity magnitude used to scale friction bounds.
    pub friction_gravity: f32,
    /// Timestep used for SPOOK parameters.
    pub dt: f32,
}

/// A shape pair that overlapped in test-only mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeOverlap {
    pub body_a: usize,
    pub body_b: usize,
    pub shape_a: ShapeId,
    pub shape_b: ShapeId,
}

/// Generates contact and friction equations.
#[derive(Debug, Clone, Default)]
pub struct Narrowphase {
    /// Replace per-contact friction of multi-point manifolds with a single
    /// averaged pair.
    pub enable_friction_reduction: bool,
}

impl Narrowphase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends equations for every pair in `pairs`.
    ///
    /// Pairs involving a trigger, or a kinematic body against a static or
    /// kinematic one, are only tested for overlap and reported in `overlaps`.
    pub fn get_contacts(
        &self,
        pairs: &[(usize, usize)],
        ctx: &NarrowphaseContext<'_>,
        contacts: &mut Vec<Equation>,
        friction: &mut Vec<Equation>,
        overlaps: &mut Vec<ShapeOverlap>,
    ) {
        for &(i, j) in pairs {
            let bi = &ctx.bodies[i];
            let bj = &ctx.bodies[j];
            let just_test = just_test(bi, bj);

            for attach_i in bi.shapes() {
                let (pos_i, quat_i) = attach_i.world_pose(bi.position, bi.orientation);
                let si = &attach_i.shape;
                for attach_j in bj.shapes() {
                    let sj = &attach_j.shape;
                    if si.collision_filter_mask & sj.collision_filter_group == 0
                        || sj.collision_filter_mask & si.collision_filter_group == 0
                    {
                        continue;
                    }
                    let (pos_j, quat_j) = attach_j.world_pose(bj.position, bj.orientation);
                    if pos_i.distance(pos_j) > si.bounding_sphere_radius() + sj.bounding_sphere_radius() {
                        continue;
                    }

                    let material = resolve_contact_material(ctx, bi, si, bj, sj);
                    let ((ia, a, pa, qa), (ib, b, pb, qb)) = if si.kind().bits() <= sj.kind().bits() {
                        ((i, si, pos_i, quat_i), (j, sj, pos_j, quat_j))
                    } else {
                        ((j, sj, pos_j, quat_j), (i, si, pos_i, quat_i))
                    };

                    let mut pair = PairContext {
                        body_a: &ctx.bodies[ia],
                        body_b: &ctx.bodies[ib],
                        index_a: ia,
                        index_b: ib,
                        shape_a: a,
                        shape_b: b,
                        material,
                        friction_gravity: ctx.friction_gravity,
                        dt: ctx.dt,
                        just_test,
                        friction_reduction: self.enable_friction_reduction,
                        flipped: false,
                        contacts: &mut *contacts,
                        friction: &mut *friction,
                    };
                    if pair.dispatch(pa, qa, pb, qb) && just_test {
                        overlaps.push(ShapeOverlap {
                            body_a: ia,
                            body_b: ib,
                            shape_a: a.id,
                            shape_b: b.id,
                        });
                    }
                }
            }
        }
        trace!(
            pairs = pairs.len(),
            contacts = contacts.len(),
            friction = friction.len(),
            "narrowphase"
        );
    }
}

fn just_test(a: &Body, b: &Body) -> bool {
    use BodyType::{Kinematic, Static};
    a.is_trigger
        || b.is_trigger
        || matches!(
            (a.body_type, b.body_type),
            (Kinematic, Static) | (Static, Kinematic) | (Kinematic, Kinematic)
        )
}

/// Shape materials first, then body materials, then the world default.
fn resolve_contact_material<'a>(
    ctx: &NarrowphaseContext<'a>,
    bi: &Body,
    si: &Shape,
    bj: &Body,
    sj: &Shape,
) -> &'a ContactMaterial {
    let lookup = |a: Option<&Material>, b: Option<&Material>| match (a, b) {
        (Some(a), Some(b)) => ctx.contact_materials.get(a.id, b.id),
        _ => None,
    };
    lookup(si.material.as_ref(), sj.material.as_ref())
        .or_else(|| lookup(bi.material.as_ref(), bj.material.as_ref()))
        .unwrap_or(ctx.default_material)
}

/// Effective material of a shape on a body.
fn effective_material<'a>(body: &'a Body, shape: &'a Shape) -> Option<&'a Material> {
    shape.material.as_ref().or(body.material.as_ref())
}

// ============================================================================
// Per-pair generation
// ============================================================================

/// One ordered shape pair being processed, with the output buffers.
pub(crate) struct PairContext<'a, 'o> {
    body_a: &'a Body,
    body_b: &'a Body,
    index_a: usize,
    index_b: usize,
    shape_a: &'a Shape,
    shape_b: &'a Shape,
    material: &'a ContactMaterial,
    friction_gravity: f32,
    dt: f32,
    just_test: bool,
    friction_reduction: bool,
    /// Handler arguments are in B, A order.
    flipped: bool,
    contacts: &'o mut Vec<Equation>,
    friction: &'o mut Vec<Equation>,
}

impl PairContext<'_, '_> {
    /// Runs the handler for this pair. Returns whether the shapes touch.
    fn dispatch(&mut self, pa: Vec3, qa: Quat, pb: Vec3, qb: Quat) -> bool {
        use ShapeGeometry as G;
        let (a, b) = (self.shape_a, self.shape_b);
        match (&a.geometry, &b.geometry) {
            (G::Sphere { radius: ra }, G::Sphere { radius: rb }) => self.sphere_sphere(*ra, pa, *rb, pb),
            (G::Sphere { radius }, G::Plane) => self.sphere_plane(*radius, pa, pb, qb),
            (G::Sphere { radius }, G::Box(bx)) => self.sphere_box(*radius, pa, bx.half_extents(), pb, qb),
            (G::Sphere { radius }, G::ConvexPolyhedron(_) | G::Cylinder(_)) => match b.hull() {
                Some(hull) => self.sphere_convex(*radius, pa, hull, pb, qb),
                None => false,
            },
            (G::Sphere { radius }, G::Heightfield(hf)) => self.sphere_heightfield(*radius, pa, hf, pb, qb),
            (G::Sphere { radius }, G::Particle) => self.sphere_particle(*radius, pa, pb),
            (G::Sphere { radius }, G::Trimesh(mesh)) => self.sphere_trimesh(*radius, pa, mesh, pb, qb),

            (G::Plane, G::Box(_) | G::ConvexPolyhedron(_) | G::Cylinder(_)) => match b.hull() {
                Some(hull) => self.plane_convex(pa, qa, hull, pb, qb),
                None => false,
            },
            (G::Plane, G::Particle) => self.plane_particle(pa, qa, pb),
            (G::Plane, G::Trimesh(mesh)) => self.plane_trimesh(pa, qa, mesh, pb, qb),

            (
                G::Box(_) | G::ConvexPolyhedron(_) | G::Cylinder(_),
                G::Box(_) | G::ConvexPolyhedron(_) | G::Cylinder(_),
            ) => match (a.hull(), b.hull()) {
                (Some(ha), Some(hb)) => self.convex_convex(ha, pa, qa, hb, pb, qb),
                _ => false,
            },
            (G::Box(_) | G::ConvexPolyhedron(_), G::Heightfield(hf)) => match a.hull() {
                Some(hull) => self.convex_heightfield(hull, pa, qa, hf, pb, qb),
                None => false,
            },
            (G::Heightfield(hf), G::Cylinder(_)) => match b.hull() {
                Some(hull) => self.flipped(|p| p.convex_heightfield(hull, pb, qb, hf, pa, qa)),
                None => false,
            },
            (G::Box(_) | G::ConvexPolyhedron(_) | G::Heightfield(_), G::Particle) => match &a.geometry {
                G::Heightfield(hf) => self.heightfield_particle(hf, pa, qa, pb),
                _ => match a.hull() {
                    Some(hull) => self.convex_particle(hull, pa, qa, pb),
                    None => false,
                },
            },
            (G::Particle, G::Cylinder(_)) => match b.hull() {
                Some(hull) => self.flipped(|p| p.convex_particle(hull, pb, qb, pa)),
                None => false,
            },
            (G::Box(_) | G::ConvexPolyhedron(_) | G::Cylinder(_), G::Trimesh(mesh)) => match a.hull() {
                Some(hull) => self.convex_trimesh(hull, pa, qa, mesh, pb, qb),
                None => false,
            },
            _ => false,
        }
    }

    /// Runs a handler written with the shapes in B, A order.
    fn flipped(&mut self, handler: impl FnOnce(&mut Self) -> bool) -> bool {
        self.flipped = !self.flipped;
        let hit = handler(self);
        self.flipped = !self.flipped;
        hit
    }

    fn enabled(&self) -> bool {
        self.body_a.collision_response
            && self.body_b.collision_response
            && self.shape_a.collision_response
            && self.shape_b.collision_response
    }

    /// Records a contact. `normal` points from the handler's first shape to
    /// its second; the points are the world contact points on each.
    fn emit(&mut self, normal: Vec3, point_first: Vec3, point_second: Vec3) {
        self.emit_contact(normal, point_first, point_second, true);
    }

    /// Like [`Self::emit`], deferring friction to [`Self::end_manifold`] when
    /// friction reduction is on.
    fn emit_manifold(&mut self, normal: Vec3, point_first: Vec3, point_second: Vec3) {
        let with_friction = !self.friction_reduction;
        self.emit_contact(normal, point_first, point_second, with_friction);
    }

    fn emit_contact(&mut self, normal: Vec3, point_first: Vec3, point_second: Vec3, with_friction: bool) {
        let (ni, point_a, point_b) = if self.flipped {
            (-normal, point_second, point_first)
        } else {
            (normal, point_first, point_second)
        };
        let eq = self.create_contact(ni, point_a - self.body_a.position, point_b - self.body_b.position);
        if with_friction {
            self.create_friction(&eq, ni, eq_offsets(&eq));
        }
        self.contacts.push(eq);
    }

    fn create_contact(&self, ni: Vec3, ri: Vec3, rj: Vec3) -> Equation {
        let mut restitution = self.material.restitution;
        let ma = effective_material(self.body_a, self.shape_a);
        let mb = effective_material(self.body_b, self.shape_b);
        if let (Some(ra), Some(rb)) = (ma.and_then(|m| m.restitution), mb.and_then(|m| m.restitution)) {
            restitution = ra * rb;
        }

        let mut eq = Equation::contact(self.index_a, self.index_b, CONTACT_MAX_FORCE);
        eq.kind = EquationKind::Contact {
            ri,
            rj,
            ni,
            restitution,
        };
        eq.shape_a = Some(self.shape_a.id);
        eq.shape_b = Some(self.shape_b.id);
        eq.enabled = self.enabled();
        eq.set_spook_params(
            self.material.contact_equation_stiffness,
            self.material.contact_equation_relaxation,
            self.dt,
        );
        eq
    }

    fn friction_coefficient(&self) -> f32 {
        let ma = effective_material(self.body_a, self.shape_a);
        let mb = effective_material(self.body_b, self.shape_b);
        match (ma.and_then(|m| m.friction), mb.and_then(|m| m.friction)) {
            (Some(fa), Some(fb)) => fa * fb,
            _ => self.material.friction,
        }
    }

    /// Pushes two friction rows tangent to `ni` at the contact offsets.
    fn create_friction(&mut self, contact: &Equation, ni: Vec3, (ri, rj): (Vec3, Vec3)) -> bool {
        let mu = self.friction_coefficient();
        if mu <= 0.0 {
            return false;
        }
        let mug = mu * self.friction_gravity;
        let mut reduced_mass = self.body_a.inv_mass() + self.body_b.inv_mass();
        if reduced_mass > 0.0 {
            reduced_mass = 1.0 / reduced_mass;
        }
        let (t1, t2) = ni.tangents();
        for t in [t1, t2] {
            let mut eq = Equation::friction(self.index_a, self.index_b, mug * reduced_mass);
            eq.kind = EquationKind::Friction { ri, rj, t };
            eq.shape_a = contact.shape_a;
            eq.shape_b = contact.shape_b;
            eq.enabled = contact.enabled;
            eq.set_spook_params(
                self.material.friction_equation_stiffness,
                self.material.friction_equation_relaxation,
                self.dt,
            );
            self.friction.push(eq);
        }
        true
    }

    /// Start of a multi-contact manifold.
    fn begin_manifold(&self) -> usize {
        self.contacts.len()
    }

    /// With friction reduction, adds one friction pair for the contacts
    /// pushed since `start`, at their averaged offsets and normal.
    fn end_manifold(&mut self, start: usize) {
        let n = self.contacts.len() - start;
        if !self.friction_reduction || n == 0 {
            return;
        }
        let (mut normal, mut ri_sum, mut rj_sum) = (Vec3::ZERO, Vec3::ZERO, Vec3::ZERO);
        for eq in &self.contacts[start..] {
            if let EquationKind::Contact { ri, rj, ni, .. } = eq.kind {
                normal += ni;
                ri_sum += ri;
                rj_sum += rj;
            }
        }
        let inv = 1.0 / n as f32;
        let Some(normal) = normal.try_normalize() else {
            return;
        };
        let last = self.contacts[self.contacts.len() - 1].clone();
        self.create_friction(&last, normal, (ri_sum * inv, rj_sum * inv));
    }
}

fn eq_offsets(eq: &Equation) -> (Vec3, Vec3) {
    match eq.kind {
        EquationKind::Contact { ri, rj, .. } => (ri, rj),
        _ => (Vec3::ZERO, Vec3::ZERO),
    }
}

/// Whether `point` lies inside the convex polygon `vertices` with face `normal`.
pub(crate) fn point_in_polygon(vertices: &[Vec3], normal: Vec3, point: Vec3) -> bool {
    let mut side: Option<bool> = None;
    for (k, &v) in vertices.iter().enumerate() {
        let edge = vertices[(k + 1) % vertices.len()] - v;
        let r = edge.cross(normal).dot(point - v);
        let inside = r > 0.0;
        match side {
            None => side = Some(inside),
            Some(s) if s == inside => {}
            Some(_) => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::ContactMaterial;

    pub(super) struct Fixture {
        pub bodies: Vec<Body>,
        pub table: ContactMaterialTable,
        pub default_material: ContactMaterial,
    }

    impl Fixture {
        pub fn new(bodies: Vec<Body>) -> Self {
            Self {
                bodies,
                table: ContactMaterialTable::default(),
                default_material: ContactMaterial::default(),
            }
        }

        pub fn run(&self, narrowphase: &Narrowphase) -> (Vec<Equation>, Vec<Equation>, Vec<ShapeOverlap>) {
            let ctx = NarrowphaseContext {
                bodies: &self.bodies,
                contact_materials: &self.table,
                default_material: &self.default_material,
                friction_gravity: 9.82,
                dt: 1.0 / 60.0,
            };
            let pairs: Vec<(usize, usize)> = (0..self.bodies.len())
                .flat_map(|j| (0..j).map(move |i| (i, j)))
                .collect();
            let (mut c, mut f, mut o) = (Vec::new(), Vec::new(), Vec::new());
            narrowphase.get_contacts(&pairs, &ctx, &mut c, &mut f, &mut o);
            (c, f, o)
        }

        pub fn contacts(&self) -> Vec<Equation> {
            self.run(&Narrowphase::new()).0
        }
    }

    pub(super) fn body_with(shape: Shape, position: Vec3) -> Body {
        Body::new(1.0).with_shape(shape).with_position(position)
    }

    /// Penetration `g` of a contact equation (negative when overlapping).
    pub(super) fn gap(eq: &Equation, bodies: &[Body]) -> f32 {
        match eq.kind {
            EquationKind::Contact { ri, rj, ni, .. } => {
                let a = &bodies[eq.body_a];
                let b = &bodies[eq.body_b];
                ni.dot(b.position + rj - a.position - ri)
            }
            _ => 0.0,
        }
    }

    #[test]
    fn test_point_in_polygon() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ];
        assert!(point_in_polygon(&square, Vec3::Z, Vec3::new(0.5, 0.5, 3.0)));
        assert!(!point_in_polygon(&square, Vec3::Z, Vec3::new(1.5, 0.5, 0.0)));
    }

    #[test]
    fn test_friction_pairs_and_bounds() {
        let fx = Fixture::new(vec![
            body_with(Shape::sphere(1.0).unwrap(), Vec3::ZERO),
            body_with(Shape::sphere(1.0).unwrap(), Vec3::new(1.5, 0.0, 0.0)),
        ]);
        let (contacts, friction, _) = fx.run(&Narrowphase::new());
        assert_eq!(contacts.len(), 1);
        assert_eq!(friction.len(), 2);
        // mu * g * reduced mass = 0.3 * 9.82 * 0.5
        let slip = 0.3 * 9.82 * 0.5;
        for f in &friction {
            assert!((f.max_force - slip).abs() < 1e-4);
            assert!((f.min_force + slip).abs() < 1e-4);
        }
    }

    #[test]
    fn test_material_lookup_prefers_shape() {
        let ice = Material::new("ice");
        let steel = Material::new("steel");
        let rubber = Material::new("rubber");
        let mut fx = Fixture::new(vec![
            body_with(
                Shape::sphere(1.0).unwrap().with_material(ice.clone()),
                Vec3::ZERO,
            )
            .with_material(steel.clone()),
            body_with(
                Shape::sphere(1.0).unwrap().with_material(ice.clone()),
                Vec3::new(1.5, 0.0, 0.0),
            )
            .with_material(steel.clone()),
        ]);
        fx.table.insert(ContactMaterial::new(&ice, &ice).with_friction(0.0).with_restitution(0.7));
        fx.table.insert(ContactMaterial::new(&steel, &steel).with_friction(0.9));
        fx.table.insert(ContactMaterial::new(&rubber, &steel).with_friction(0.5));

        let (contacts, friction, _) = fx.run(&Narrowphase::new());
        assert!(friction.is_empty());
        assert!(matches!(
            contacts[0].kind,
            EquationKind::Contact { restitution, .. } if restitution == 0.7
        ));
    }

    #[test]
    fn test_material_override_multiplies() {
        let a = Material::new("a").with_friction(0.5).with_restitution(0.5);
        let b = Material::new("b").with_friction(0.4).with_restitution(0.2);
        let fx = Fixture::new(vec![
            body_with(Shape::sphere(1.0).unwrap(), Vec3::ZERO).with_material(a),
            body_with(Shape::sphere(1.0).unwrap(), Vec3::new(1.5, 0.0, 0.0)).with_material(b),
        ]);
        let (contacts, friction, _) = fx.run(&Narrowphase::new());
        assert!(matches!(
            contacts[0].kind,
            EquationKind::Contact { restitution, .. } if (restitution - 0.1).abs() < 1e-6
        ));
        let slip = 0.2 * 9.82 * 0.5;
        assert!((friction[0].max_force - slip).abs() < 1e-4);
    }

    #[test]
    fn test_trigger_only_reports_overlap() {
        let fx = Fixture::new(vec![
            body_with(Shape::sphere(1.0).unwrap(), Vec3::ZERO).with_trigger(true),
            body_with(Shape::sphere(1.0).unwrap(), Vec3::new(1.5, 0.0, 0.0)),
        ]);
        let (contacts, friction, overlaps) = fx.run(&Narrowphase::new());
        assert!(contacts.is_empty() && friction.is_empty());
        assert_eq!(overlaps.len(), 1);
    }

    #[test]
    fn test_kinematic_static_is_test_only() {
        let fx = Fixture::new(vec![
            Body::new_static().with_shape(Shape::plane()),
            body_with(Shape::sphere(1.0).unwrap(), Vec3::new(0.0, 0.0, 0.5))
                .with_type(BodyType::Kinematic),
        ]);
        let (contacts, _, overlaps) = fx.run(&Narrowphase::new());
        assert!(contacts.is_empty());
        assert_eq!(overlaps.len(), 1);
    }

    #[test]
    fn test_shape_filter_and_response() {
        let fx = Fixture::new(vec![
            body_with(Shape::sphere(1.0).unwrap().with_filter(1, 2), Vec3::ZERO),
            body_with(Shape::sphere(1.0).unwrap().with_filter(4, u32::MAX), Vec3::new(1.5, 0.0, 0.0)),
        ]);
        assert!(fx.contacts().is_empty());

        let fx = Fixture::new(vec![
            body_with(Shape::sphere(1.0).unwrap(), Vec3::ZERO),
            body_with(
                Shape::sphere(1.0).unwrap().with_collision_response(false),
                Vec3::new(1.5, 0.0, 0.0),
            ),
        ]);
        let contacts = fx.contacts();
        assert_eq!(contacts.len(), 1);
        assert!(!contacts[0].enabled);
    }

    #[test]
    fn test_friction_reduction_averages_manifold() {
        let fx = Fixture::new(vec![
            Body::new_static().with_shape(Shape::plane()),
            body_with(Shape::cuboid(Vec3::splat(0.5)).unwrap(), Vec3::new(0.0, 0.0, 0.45)),
        ]);
        let (contacts, friction, _) = fx.run(&Narrowphase::new());
        assert_eq!(contacts.len(), 4);
        assert_eq!(friction.len(), 8);

        let reduced = Narrowphase {
            enable_friction_reduction: true,
        };
        let (contacts, friction, _) = fx.run(&reduced);
        assert_eq!(contacts.len(), 4);
        assert_eq!(friction.len(), 2);
        if let EquationKind::Friction { ri, .. } = friction[0].kind {
            assert!(ri.x.abs() < 1e-5 && ri.y.abs() < 1e-5);
        }
    }
}
