//! Eager resolution driver.
//!
//! Walks a method's decoded body and forces everything it touches: callee
//! bodies, native member caches for local-variable types, and base-chain
//! initialization for field targets. Startup code runs this over its entry
//! points so the first frames execute without lazy-init stalls.

use std::collections::HashSet;

use tracing::debug;

use crate::error::BindError;
use crate::method::body::OpCode;
use crate::method::{MethodRuntime, RuntimeMethod};
use crate::registry::{unpack_field_token, MethodId, Registry, TypeId};
use crate::types::TypeRuntime;

/// Force-resolve a method and, with `recursive`, its transitive callees.
/// Returns the number of interpreted methods whose bodies were forced
/// resident, already-decoded bodies included.
///
/// Prewarming is best-effort: a method whose body fails to decode is skipped
/// and will surface its error at execution time instead.
pub fn prewarm(registry: &Registry, method: MethodId, recursive: bool) -> Result<usize, BindError> {
    let mut walker = Prewarmer {
        registry,
        visited: HashSet::new(),
        recursive,
        warmed: 0,
    };
    walker.warm(method)?;
    Ok(walker.warmed)
}

struct Prewarmer<'a> {
    registry: &'a Registry,
    visited: HashSet<MethodId>,
    recursive: bool,
    warmed: usize,
}

impl Prewarmer<'_> {
    fn warm(&mut self, mid: MethodId) -> Result<(), BindError> {
        if !self.visited.insert(mid) {
            return Ok(());
        }
        let method = self.registry.method(mid);
        let interpreted = match method.as_ref() {
            RuntimeMethod::Interpreted(m) => m,
            RuntimeMethod::Native(m) => {
                self.warm_type(m.declaring_type());
                return Ok(());
            }
        };
        // An unbound generic definition has nothing concrete to resolve
        // against; its specializations warm themselves.
        if interpreted.generic_param_count() > 0 {
            return Ok(());
        }

        let body = match interpreted.body(self.registry) {
            Ok(body) => body,
            Err(e) => {
                debug!(method = %interpreted.display_name(self.registry), error = %e, "prewarm skipped method");
                return Ok(());
            }
        };
        self.warmed += 1;

        for &local in body.local_types.iter() {
            self.warm_type(local);
        }

        for ins in body.instructions.iter() {
            if ins.opcode.is_call() {
                // Degraded encoding: the callee was unresolvable at decode.
                if ins.token < 0 {
                    continue;
                }
                let callee = MethodId(ins.token as u32);
                match self.registry.try_method(callee).as_deref() {
                    Some(RuntimeMethod::Interpreted(_)) => {
                        if self.recursive {
                            self.warm(callee)?;
                        }
                    }
                    Some(RuntimeMethod::Native(m)) => self.warm_type(m.declaring_type()),
                    None => {}
                }
            } else if ins.opcode.is_field_access() {
                let (declaring, _) = unpack_field_token(ins.token_long);
                self.warm_base_chain(declaring);
            } else if ins.opcode == OpCode::Ldtoken && ins.token == 1 {
                self.warm_type(TypeId(ins.token_long as u32));
            }
        }
        Ok(())
    }

    fn warm_type(&self, id: TypeId) {
        if let Some(ty) = self.registry.try_ty(id) {
            if let Err(e) = ty.prewarm_members(self.registry) {
                debug!(ty = %ty.name(), error = %e, "prewarm skipped type members");
            }
        }
    }

    fn warm_base_chain(&self, id: TypeId) {
        let Some(ty) = self.registry.try_ty(id) else {
            return;
        };
        if let Err(e) = ty.prewarm_members(self.registry) {
            debug!(ty = %ty.name(), error = %e, "prewarm skipped type members");
            return;
        }
        match ty.base_type(self.registry) {
            Ok(Some(base)) => self.warm_base_chain(base),
            Ok(None) => {}
            Err(e) => debug!(ty = %ty.name(), error = %e, "prewarm skipped base chain"),
        }
    }
}
