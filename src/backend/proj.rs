//! PROJ backend through the raw `proj-sys` bindings.
//!
//! The high-level `proj` crate only exposes a single best operation. The
//! selection policy needs the whole ranked candidate list and the metadata of
//! each candidate, so this module talks to the C API directly.
//!
//! PROJ contexts are not thread-safe. Every call creates its own context;
//! objects created from it keep it alive through an `Rc`, which makes the
//! returned operations `!Send` as the [`Operation`] trait allows.

use super::{CrsSummary, GeodeticBackend, InputCoord, Operation, OperationMetadata, OperationStep, StepKind};
use crate::config::ProjConfig;
use crate::crs::{Axis, CrsIdentifier, CrsInfo, CrsKind};
use crate::error::{Result, TransformError};
use proj_sys::{
    proj_concatoperation_get_step, proj_concatoperation_get_step_count, proj_context_create,
    proj_context_destroy, proj_context_errno, proj_context_errno_string,
    proj_context_set_enable_network, proj_context_set_search_paths,
    proj_coordoperation_get_accuracy, proj_coordoperation_get_method_info,
    proj_coordoperation_is_instantiable, proj_create, proj_create_operation_factory_context,
    proj_create_operations, proj_crs_get_coordinate_system, proj_crs_get_datum,
    proj_crs_get_horizontal_datum, proj_crs_get_sub_crs, proj_cs_get_axis_count,
    proj_cs_get_axis_info, proj_destroy, proj_errno, proj_errno_reset, proj_get_id_auth_name,
    proj_get_id_code, proj_get_name, proj_get_source_crs, proj_get_target_crs, proj_get_type,
    proj_is_crs, proj_list_destroy, proj_list_get, proj_list_get_count,
    proj_normalize_for_visualization, proj_operation_factory_context_destroy,
    proj_operation_factory_context_set_allow_ballpark_transformations,
    proj_operation_factory_context_set_grid_availability_use,
    proj_operation_factory_context_set_spatial_criterion, proj_trans, PJ, PJ_CONTEXT, PJ_COORD,
    PJ_DIRECTION_PJ_FWD, PJ_TYPE, PJ_TYPE_PJ_TYPE_BOUND_CRS, PJ_TYPE_PJ_TYPE_COMPOUND_CRS,
    PJ_TYPE_PJ_TYPE_CONCATENATED_OPERATION, PJ_TYPE_PJ_TYPE_CONVERSION,
    PJ_TYPE_PJ_TYPE_DYNAMIC_GEODETIC_REFERENCE_FRAME, PJ_TYPE_PJ_TYPE_GEOCENTRIC_CRS,
    PJ_TYPE_PJ_TYPE_GEOGRAPHIC_2D_CRS, PJ_TYPE_PJ_TYPE_GEOGRAPHIC_3D_CRS,
    PJ_TYPE_PJ_TYPE_PROJECTED_CRS, PJ_TYPE_PJ_TYPE_TRANSFORMATION, PJ_TYPE_PJ_TYPE_VERTICAL_CRS,
    PROJ_GRID_AVAILABILITY_USE_PROJ_GRID_AVAILABILITY_USED_FOR_SORTING,
    PROJ_SPATIAL_CRITERION_PROJ_SPATIAL_CRITERION_PARTIAL_INTERSECTION,
};
use std::ffi::{c_char, c_int, CStr, CString};
use std::ptr;
use std::rc::Rc;

/// Geodetic backend backed by the PROJ database.
#[derive(Debug, Clone)]
pub struct ProjBackend {
    config: ProjConfig,
}

impl ProjBackend {
    pub fn new(config: &ProjConfig) -> Result<Self> {
        // Fail early on a broken installation
        let ctx = Context::new(config)?;
        Object::create(&ctx, "EPSG:4326")?;
        Ok(Self {
            config: config.clone(),
        })
    }
}

impl GeodeticBackend for ProjBackend {
    fn name(&self) -> &str {
        "proj"
    }

    fn resolve_crs(&self, id: &CrsIdentifier) -> Result<CrsInfo> {
        let ctx = Context::new(&self.config)?;
        let crs = Object::create(&ctx, &id.to_string())
            .map_err(|_| TransformError::UnknownCrs(id.to_string()))?;
        if !crs.is_crs() {
            return Err(TransformError::UnknownCrs(id.to_string()));
        }
        crs_info(id, &crs.unbound())
    }

    fn operations(
        &self,
        source: &CrsIdentifier,
        target: &CrsIdentifier,
    ) -> Result<Vec<Box<dyn Operation>>> {
        let ctx = Context::new(&self.config)?;
        let source_crs = Object::create(&ctx, &source.to_string())
            .map_err(|_| TransformError::UnknownCrs(source.to_string()))?;
        let target_crs = Object::create(&ctx, &target.to_string())
            .map_err(|_| TransformError::UnknownCrs(target.to_string()))?;

        let factory = unsafe { proj_create_operation_factory_context(ctx.ptr, ptr::null()) };
        if factory.is_null() {
            return Err(TransformError::Backend(ctx.last_error()));
        }

        let list = unsafe {
            proj_operation_factory_context_set_allow_ballpark_transformations(
                ctx.ptr,
                factory,
                c_int::from(self.config.allow_ballpark),
            );
            proj_operation_factory_context_set_spatial_criterion(
                ctx.ptr,
                factory,
                PROJ_SPATIAL_CRITERION_PROJ_SPATIAL_CRITERION_PARTIAL_INTERSECTION,
            );
            proj_operation_factory_context_set_grid_availability_use(
                ctx.ptr,
                factory,
                PROJ_GRID_AVAILABILITY_USE_PROJ_GRID_AVAILABILITY_USED_FOR_SORTING,
            );
            let list = proj_create_operations(ctx.ptr, source_crs.ptr, target_crs.ptr, factory);
            proj_operation_factory_context_destroy(factory);
            list
        };
        if list.is_null() {
            return Err(TransformError::Backend(ctx.last_error()));
        }

        let count = unsafe { proj_list_get_count(list) };
        let mut operations: Vec<Box<dyn Operation>> = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let raw = unsafe { proj_list_get(ctx.ptr, list, index) };
            let Some(raw) = Object::wrap(&ctx, raw) else {
                continue;
            };
            if unsafe { proj_coordoperation_is_instantiable(ctx.ptr, raw.ptr) } == 0 {
                tracing::debug!("Skipping non-instantiable operation '{}'", raw.name());
                continue;
            }
            operations.push(Box::new(ProjOperation::new(raw)?));
        }
        unsafe { proj_list_destroy(list) };

        Ok(operations)
    }
}

struct Context {
    ptr: *mut PJ_CONTEXT,
}

impl Context {
    fn new(config: &ProjConfig) -> Result<Rc<Self>> {
        let ptr = unsafe { proj_context_create() };
        if ptr.is_null() {
            return Err(TransformError::Backend(
                "unable to create PROJ context".to_string(),
            ));
        }
        let ctx = Rc::new(Self { ptr });

        if !config.search_paths.is_empty() {
            let paths = config
                .search_paths
                .iter()
                .map(|p| {
                    CString::new(p.to_string_lossy().into_owned()).map_err(|e| {
                        TransformError::Backend(format!("invalid PROJ search path: {}", e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let ptrs: Vec<*const c_char> = paths.iter().map(|p| p.as_ptr()).collect();
            unsafe { proj_context_set_search_paths(ctx.ptr, ptrs.len() as c_int, ptrs.as_ptr()) };
        }

        unsafe { proj_context_set_enable_network(ctx.ptr, c_int::from(config.enable_network)) };

        Ok(ctx)
    }

    fn last_error(&self) -> String {
        let code = unsafe { proj_context_errno(self.ptr) };
        if code == 0 {
            return "unknown PROJ error".to_string();
        }
        unsafe { string_from(proj_context_errno_string(self.ptr, code)) }
            .unwrap_or_else(|| format!("PROJ error {}", code))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { proj_context_destroy(self.ptr) };
    }
}

/// Owned `PJ` handle.
struct Object {
    ptr: *mut PJ,
    ctx: Rc<Context>,
}

impl Object {
    fn wrap(ctx: &Rc<Context>, ptr: *mut PJ) -> Option<Self> {
        (!ptr.is_null()).then(|| Self {
            ptr,
            ctx: ctx.clone(),
        })
    }

    fn create(ctx: &Rc<Context>, definition: &str) -> Result<Self> {
        let definition = CString::new(definition)
            .map_err(|e| TransformError::InvalidInput(e.to_string()))?;
        let ptr = unsafe { proj_create(ctx.ptr, definition.as_ptr()) };
        Self::wrap(ctx, ptr).ok_or_else(|| TransformError::Backend(ctx.last_error()))
    }

    /// Object derived from this one through a context-taking getter.
    fn derive(&self, getter: unsafe extern "C" fn(*mut PJ_CONTEXT, *const PJ) -> *mut PJ) -> Option<Self> {
        let ptr = unsafe { getter(self.ctx.ptr, self.ptr) };
        Self::wrap(&self.ctx, ptr)
    }

    fn is_crs(&self) -> bool {
        unsafe { proj_is_crs(self.ptr) != 0 }
    }

    fn pj_type(&self) -> PJ_TYPE {
        unsafe { proj_get_type(self.ptr) }
    }

    fn name(&self) -> String {
        unsafe { string_from(proj_get_name(self.ptr)) }.unwrap_or_default()
    }

    fn identifier(&self) -> Option<CrsIdentifier> {
        let authority = unsafe { string_from(proj_get_id_auth_name(self.ptr, 0)) }?;
        let code = unsafe { string_from(proj_get_id_code(self.ptr, 0)) }?;
        Some(CrsIdentifier::new(authority, code))
    }

    fn sub_crs(&self) -> Vec<Object> {
        let mut subs = Vec::new();
        let mut index = 0;
        loop {
            let ptr = unsafe { proj_crs_get_sub_crs(self.ctx.ptr, self.ptr, index) };
            match Self::wrap(&self.ctx, ptr) {
                Some(sub) => subs.push(sub),
                None => break,
            }
            index += 1;
        }
        subs
    }

    /// Bound CRSs are described by their source CRS.
    fn unbound(self) -> Self {
        if self.pj_type() == PJ_TYPE_PJ_TYPE_BOUND_CRS {
            if let Some(source) = self.derive(proj_get_source_crs) {
                return source;
            }
        }
        self
    }

    fn axes(&self) -> Result<Vec<Axis>> {
        if self.pj_type() == PJ_TYPE_PJ_TYPE_COMPOUND_CRS {
            let mut axes = Vec::new();
            for sub in self.sub_crs() {
                axes.extend(sub.unbound().axes()?);
            }
            return Ok(axes);
        }

        let cs = self
            .derive(proj_crs_get_coordinate_system)
            .ok_or_else(|| TransformError::Backend(self.ctx.last_error()))?;
        let count = unsafe { proj_cs_get_axis_count(self.ctx.ptr, cs.ptr) };

        let mut axes = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count {
            let mut name: *const c_char = ptr::null();
            let mut abbrev: *const c_char = ptr::null();
            let mut direction: *const c_char = ptr::null();
            let mut conv_factor = 0.0;
            let mut unit_name: *const c_char = ptr::null();
            let mut unit_auth: *const c_char = ptr::null();
            let mut unit_code: *const c_char = ptr::null();

            let ok = unsafe {
                proj_cs_get_axis_info(
                    self.ctx.ptr,
                    cs.ptr,
                    index,
                    &mut name,
                    &mut abbrev,
                    &mut direction,
                    &mut conv_factor,
                    &mut unit_name,
                    &mut unit_auth,
                    &mut unit_code,
                )
            };
            if ok == 0 {
                return Err(TransformError::Backend(self.ctx.last_error()));
            }

            unsafe {
                axes.push(Axis {
                    name: string_from(name).unwrap_or_default(),
                    abbrev: string_from(abbrev).unwrap_or_default(),
                    direction: string_from(direction).unwrap_or_default(),
                    unit_name: string_from(unit_name).unwrap_or_default(),
                });
            }
        }
        Ok(axes)
    }

    fn has_dynamic_datum(&self) -> bool {
        let datum = self
            .derive(proj_crs_get_datum)
            .or_else(|| self.derive(proj_crs_get_horizontal_datum));
        datum.is_some_and(|d| d.pj_type() == PJ_TYPE_PJ_TYPE_DYNAMIC_GEODETIC_REFERENCE_FRAME)
    }

    fn summary(&self) -> CrsSummary {
        CrsSummary {
            identifier: self.identifier(),
            axis_count: self.axes().map(|a| a.len()).unwrap_or(0),
            dynamic_datum: self.has_dynamic_datum(),
        }
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        unsafe { proj_destroy(self.ptr) };
    }
}

/// Copy a C string owned by PROJ.
unsafe fn string_from(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

fn crs_kind(pj_type: PJ_TYPE) -> CrsKind {
    match pj_type {
        PJ_TYPE_PJ_TYPE_GEOGRAPHIC_2D_CRS => CrsKind::Geographic2D,
        PJ_TYPE_PJ_TYPE_GEOGRAPHIC_3D_CRS => CrsKind::Geographic3D,
        PJ_TYPE_PJ_TYPE_GEOCENTRIC_CRS => CrsKind::Geocentric,
        PJ_TYPE_PJ_TYPE_PROJECTED_CRS => CrsKind::Projected,
        PJ_TYPE_PJ_TYPE_VERTICAL_CRS => CrsKind::Vertical,
        PJ_TYPE_PJ_TYPE_COMPOUND_CRS => CrsKind::Compound,
        PJ_TYPE_PJ_TYPE_BOUND_CRS => CrsKind::Bound,
        _ => CrsKind::Other,
    }
}

fn crs_info(id: &CrsIdentifier, crs: &Object) -> Result<CrsInfo> {
    let sub_crs = if crs.pj_type() == PJ_TYPE_PJ_TYPE_COMPOUND_CRS {
        crs.sub_crs()
            .into_iter()
            .map(|sub| {
                let sub = sub.unbound();
                let sub_id = sub.identifier().unwrap_or_else(|| id.clone());
                crs_info(&sub_id, &sub)
            })
            .collect::<Result<Vec<_>>>()?
    } else {
        Vec::new()
    };

    Ok(CrsInfo {
        identifier: id.clone(),
        name: crs.name(),
        kind: crs_kind(crs.pj_type()),
        axes: crs.axes()?,
        sub_crs,
        dynamic_datum: crs.has_dynamic_datum(),
    })
}

struct ProjOperation {
    // Normalized for always-xy input and output
    normalized: Object,
    metadata: OperationMetadata,
}

impl ProjOperation {
    fn new(raw: Object) -> Result<Self> {
        let metadata = operation_metadata(&raw);
        let normalized = unsafe { proj_normalize_for_visualization(raw.ctx.ptr, raw.ptr) };
        let normalized = Object::wrap(&raw.ctx, normalized).unwrap_or(raw);
        Ok(Self {
            normalized,
            metadata,
        })
    }
}

fn step_kind(pj_type: PJ_TYPE) -> StepKind {
    match pj_type {
        PJ_TYPE_PJ_TYPE_CONVERSION => StepKind::Conversion,
        PJ_TYPE_PJ_TYPE_TRANSFORMATION => StepKind::Transformation,
        PJ_TYPE_PJ_TYPE_CONCATENATED_OPERATION => StepKind::Concatenated,
        _ => StepKind::Other,
    }
}

fn operation_step(op: &Object) -> OperationStep {
    let mut method_name: *const c_char = ptr::null();
    let mut method_auth: *const c_char = ptr::null();
    let mut method_code: *const c_char = ptr::null();
    let ok = unsafe {
        proj_coordoperation_get_method_info(
            op.ctx.ptr,
            op.ptr,
            &mut method_name,
            &mut method_auth,
            &mut method_code,
        )
    };

    OperationStep {
        name: op.name(),
        kind: step_kind(op.pj_type()),
        method_code: if ok != 0 {
            unsafe { string_from(method_code) }
        } else {
            None
        },
    }
}

fn operation_metadata(op: &Object) -> OperationMetadata {
    let steps = if op.pj_type() == PJ_TYPE_PJ_TYPE_CONCATENATED_OPERATION {
        let count = unsafe { proj_concatoperation_get_step_count(op.ctx.ptr, op.ptr) };
        (0..count)
            .filter_map(|i| {
                let step = unsafe { proj_concatoperation_get_step(op.ctx.ptr, op.ptr, i) };
                Object::wrap(&op.ctx, step)
            })
            .map(|step| operation_step(&step))
            .collect()
    } else {
        vec![operation_step(op)]
    };

    let accuracy = unsafe { proj_coordoperation_get_accuracy(op.ctx.ptr, op.ptr) };

    OperationMetadata {
        name: op.name(),
        source: op
            .derive(proj_get_source_crs)
            .map(|crs| crs.summary())
            .unwrap_or_default(),
        target: op
            .derive(proj_get_target_crs)
            .map(|crs| crs.summary())
            .unwrap_or_default(),
        steps,
        accuracy: (accuracy >= 0.0).then_some(accuracy),
    }
}

impl Operation for ProjOperation {
    fn metadata(&self) -> &OperationMetadata {
        &self.metadata
    }

    fn transform(&self, coord: &InputCoord) -> Result<Vec<f64>> {
        let ordinates = &coord.ordinates;
        if ordinates.len() < 2 {
            return Err(TransformError::Dimension(format!(
                "expected at least 2 ordinates, got {}",
                ordinates.len()
            )));
        }

        // PROJ reads an infinite time as "no epoch"
        let mut v = [0.0, 0.0, 0.0, f64::INFINITY];
        for (slot, value) in v.iter_mut().zip(ordinates.iter().take(3)) {
            *slot = *value;
        }
        if let Some(epoch) = coord.epoch {
            v[3] = epoch;
        }

        let pj = self.normalized.ptr;
        let out = unsafe {
            proj_errno_reset(pj);
            let out = proj_trans(pj, PJ_DIRECTION_PJ_FWD, PJ_COORD { v });
            let errno = proj_errno(pj);
            if errno != 0 {
                // Failed positions come back as infinity; the caller decides
                tracing::debug!(
                    "PROJ reported error {} transforming {:?}",
                    errno,
                    &ordinates[..]
                );
            }
            out.v
        };

        Ok(out[..3].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crs::CrsRegistry;
    use crate::transform::{round_to, TransformEngine};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn backend() -> ProjBackend {
        ProjBackend::new(&ProjConfig::default()).unwrap()
    }

    fn id(s: &str) -> CrsIdentifier {
        s.parse().unwrap()
    }

    fn engine() -> TransformEngine {
        let config = Config::default();
        let backend: Arc<dyn GeodeticBackend> = Arc::new(backend());
        let registry = Arc::new(CrsRegistry::new(backend, &config.crs.supported));
        TransformEngine::new(registry, &config)
    }

    #[test]
    fn test_resolve_rd_new() {
        let info = backend().resolve_crs(&id("EPSG:28992")).unwrap();
        assert_eq!(info.kind, CrsKind::Projected);
        assert_eq!(info.axis_count(), 2);
        assert_eq!(info.x_unit().unwrap(), "metre");
    }

    #[test]
    fn test_resolve_compound() {
        let info = backend().resolve_crs(&id("EPSG:7415")).unwrap();
        assert!(info.is_compound());
        assert_eq!(info.axis_count(), 3);
        assert_eq!(info.horizontal_vertical(), (id("EPSG:28992"), id("EPSG:5709")));
    }

    #[test]
    fn test_resolve_unknown() {
        assert!(matches!(
            backend().resolve_crs(&id("EPSG:1")),
            Err(TransformError::UnknownCrs(_))
        ));
    }

    #[test]
    fn test_rd_to_wgs84() {
        let ops = backend()
            .operations(&id("EPSG:28992"), &id("EPSG:4326"))
            .unwrap();
        assert!(!ops.is_empty());

        let out = ops[0].transform(&InputCoord::build(&[10.0, 10.0], None)).unwrap();
        assert_relative_eq!(out[0], 3.313687621, epsilon = 1e-3);
        assert_relative_eq!(out[1], 47.974858156, epsilon = 1e-3);
        assert_eq!(round_to(out[0], 4), 3.3137);
        assert_eq!(round_to(out[1], 4), 47.9749);
    }

    #[test]
    fn test_engine_rd_to_wgs84() {
        let engine = engine();
        let target = id("EPSG:4326");
        assert_eq!(engine.precision_for(&target).unwrap(), 9);

        let f = engine
            .build_transform_fn(&id("EPSG:28992"), &target, Some(4), None)
            .unwrap();
        assert_eq!(f(&[10.0, 10.0]).unwrap(), vec![3.3137, 47.9749]);

        let precision = engine.precision_for(&target).unwrap();
        let f = engine
            .build_transform_fn(&id("EPSG:28992"), &target, Some(precision), None)
            .unwrap();
        let out = f(&[10.0, 10.0]).unwrap();
        assert_relative_eq!(out[0], 3.313687621, epsilon = 1e-3);
        assert_relative_eq!(out[1], 47.974858156, epsilon = 1e-3);
        assert_eq!(out[0], round_to(out[0], 9));
    }

    #[test]
    fn test_engine_horizontal_vertical_from_proj() {
        let engine = engine();
        let info = engine.registry().resolve(&id("EPSG:7415")).unwrap();
        assert_eq!(
            info.horizontal_vertical(),
            (id("EPSG:28992"), id("EPSG:5709"))
        );
    }

    #[test]
    fn test_engine_rd_nap_to_mercator_without_epoch() {
        let engine = engine();
        let selector = engine.selector();
        let transformer = selector
            .select(&id("EPSG:7415"), &id("EPSG:3857"), None)
            .unwrap();
        assert!(!transformer.is_time_dependent());

        let f = engine
            .build_transform_fn(&id("EPSG:7415"), &id("EPSG:3857"), Some(4), None)
            .unwrap();
        let out = f(&[155000.0, 463000.0, 0.0]).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    // Stock proj.db ranks no time-dependent path first for this pair
    #[test]
    #[ignore = "requires the NSGI time-dependent transformations proj.db"]
    fn test_engine_rd_nap_to_mercator_with_epoch() {
        let engine = engine();
        let transformer = engine
            .selector()
            .select(&id("EPSG:7415"), &id("EPSG:3857"), Some(2013.3))
            .unwrap();
        assert!(transformer.is_time_dependent());

        let f = engine
            .build_transform_fn(&id("EPSG:7415"), &id("EPSG:3857"), Some(4), Some(2013.3))
            .unwrap();
        assert_eq!(f(&[155000.0, 463000.0, 0.0]).unwrap().len(), 2);
    }
}
