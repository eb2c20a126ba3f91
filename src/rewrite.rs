use std::collections::HashSet;

use syn::parse_quote;
use syn::visit_mut::VisitMut;

use crate::resolve::is_instrumentable;

/// Rewrite `source` so every function named in `targets` opens a tracing
/// guard on entry. Returns the formatted source text.
///
/// Top-level functions match by bare name (e.g. "walk"). Impl methods match
/// by "Type::method". Trait default methods match by "Trait::method".
///
/// Each instrumented body gets a function-scoped call site and a guard:
///
/// ```text
/// fn walk() {
///     static __FPROF_SITE: fprof_runtime::CallSite = fprof_runtime::CallSite::new("walk");
///     let _fprof_guard = fprof_runtime::trace(&__FPROF_SITE);
///     ...
/// }
/// ```
///
/// The guard drops when the function returns or unwinds, closing the span.
pub fn instrument_source(source: &str, targets: &HashSet<String>) -> Result<String, syn::Error> {
    let mut file: syn::File = syn::parse_str(source)?;
    let mut instrumenter = Instrumenter {
        targets,
        current_impl: None,
        current_trait: None,
    };
    instrumenter.visit_file_mut(&mut file);
    Ok(prettyplease::unparse(&file))
}

/// Rewrite `source` so `fn main` pre-registers every name in `names` before
/// any traced call runs. Registration pins the names into the report even
/// when a function is never called.
pub fn inject_registrations(source: &str, names: &[String]) -> Result<String, syn::Error> {
    let mut file: syn::File = syn::parse_str(source)?;
    let mut injector = RegistrationInjector { names };
    injector.visit_file_mut(&mut file);
    Ok(prettyplease::unparse(&file))
}

/// Rewrite `source` so `fn main` initializes tracing on entry and flushes it
/// on exit, panics included.
///
/// A synchronous main is wrapped in `catch_unwind` so `shutdown()` runs
/// before the panic resumes. An async main cannot be wrapped that way (the
/// closure boundary would sit across `.await`), so its body moves into a
/// plain block instead: locals, any tracing guard included, drop when the
/// block closes, and shutdown runs after it.
pub fn inject_lifecycle(source: &str) -> Result<String, syn::Error> {
    let mut file: syn::File = syn::parse_str(source)?;
    let mut injector = LifecycleInjector;
    injector.visit_file_mut(&mut file);
    Ok(prettyplease::unparse(&file))
}

/// AST visitor that inserts a call-site static and a guard binding at the
/// top of every targeted function body.
struct Instrumenter<'a> {
    targets: &'a HashSet<String>,
    /// When inside an `impl` block, the type name used to qualify methods.
    current_impl: Option<String>,
    /// When inside a `trait` block, the trait name used to qualify defaults.
    current_trait: Option<String>,
}

impl Instrumenter<'_> {
    fn inject_guard(&self, block: &mut syn::Block, name: &str) {
        let site: syn::Stmt = parse_quote! {
            static __FPROF_SITE: fprof_runtime::CallSite = fprof_runtime::CallSite::new(#name);
        };
        let guard: syn::Stmt = parse_quote! {
            let _fprof_guard = fprof_runtime::trace(&__FPROF_SITE);
        };
        block.stmts.insert(0, site);
        block.stmts.insert(1, guard);
    }
}

impl VisitMut for Instrumenter<'_> {
    fn visit_item_fn_mut(&mut self, node: &mut syn::ItemFn) {
        let name = node.sig.ident.to_string();
        if is_instrumentable(&node.sig) && self.targets.contains(&name) {
            self.inject_guard(&mut node.block, &name);
        }
        syn::visit_mut::visit_item_fn_mut(self, node);
    }

    fn visit_item_impl_mut(&mut self, node: &mut syn::ItemImpl) {
        let prev = self.current_impl.replace(type_ident(&node.self_ty));
        syn::visit_mut::visit_item_impl_mut(self, node);
        self.current_impl = prev;
    }

    fn visit_impl_item_fn_mut(&mut self, node: &mut syn::ImplItemFn) {
        let method = node.sig.ident.to_string();
        let name = match &self.current_impl {
            Some(ty) => format!("{ty}::{method}"),
            None => method,
        };
        if is_instrumentable(&node.sig) && self.targets.contains(&name) {
            self.inject_guard(&mut node.block, &name);
        }
        syn::visit_mut::visit_impl_item_fn_mut(self, node);
    }

    fn visit_item_trait_mut(&mut self, node: &mut syn::ItemTrait) {
        let prev = self.current_trait.replace(node.ident.to_string());
        syn::visit_mut::visit_item_trait_mut(self, node);
        self.current_trait = prev;
    }

    fn visit_trait_item_fn_mut(&mut self, node: &mut syn::TraitItemFn) {
        // Only default bodies carry code to instrument.
        if node.default.is_some() {
            let method = node.sig.ident.to_string();
            let name = match &self.current_trait {
                Some(tr) => format!("{tr}::{method}"),
                None => method,
            };
            if is_instrumentable(&node.sig)
                && self.targets.contains(&name)
                && let Some(block) = node.default.as_mut()
            {
                self.inject_guard(block, &name);
            }
        }
        syn::visit_mut::visit_trait_item_fn_mut(self, node);
    }
}

struct RegistrationInjector<'a> {
    names: &'a [String],
}

impl VisitMut for RegistrationInjector<'_> {
    fn visit_item_fn_mut(&mut self, node: &mut syn::ItemFn) {
        if node.sig.ident == "main" {
            for name in self.names.iter().rev() {
                let stmt: syn::Stmt = parse_quote! {
                    fprof_runtime::register(#name);
                };
                node.block.stmts.insert(0, stmt);
            }
        }
        syn::visit_mut::visit_item_fn_mut(self, node);
    }
}

struct LifecycleInjector;

impl VisitMut for LifecycleInjector {
    fn visit_item_fn_mut(&mut self, node: &mut syn::ItemFn) {
        if node.sig.ident != "main" {
            syn::visit_mut::visit_item_fn_mut(self, node);
            return;
        }

        let has_return_type = matches!(node.sig.output, syn::ReturnType::Type(..));

        if node.sig.asyncness.is_some() {
            let existing = std::mem::take(&mut node.block.stmts);
            let mut stmts: Vec<syn::Stmt> = vec![parse_quote! { fprof_runtime::init(); }];
            if has_return_type {
                // The block's value is main's value; bind it so shutdown can
                // run before it is handed back.
                stmts.push(parse_quote! {
                    let __fprof_result = { #(#existing)* };
                });
                stmts.push(parse_quote! { fprof_runtime::shutdown(); });
                stmts.push(syn::Stmt::Expr(parse_quote! { __fprof_result }, None));
            } else {
                stmts.push(parse_quote! { { #(#existing)* } });
                stmts.push(parse_quote! { fprof_runtime::shutdown(); });
            }
            node.block.stmts = stmts;
            return;
        }

        let existing = std::mem::take(&mut node.block.stmts);

        let init: syn::Stmt = parse_quote! {
            fprof_runtime::init();
        };
        let wrapped: syn::Stmt = parse_quote! {
            let __fprof_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                #(#existing)*
            }));
        };
        let shutdown: syn::Stmt = parse_quote! {
            fprof_runtime::shutdown();
        };

        let mut stmts = vec![init, wrapped, shutdown];
        if has_return_type {
            // The closure returns main's value (early returns included);
            // hand it back as the tail expression.
            let tail: syn::Expr = parse_quote! {
                match __fprof_result {
                    Ok(__fprof_val) => __fprof_val,
                    Err(__fprof_panic) => std::panic::resume_unwind(__fprof_panic),
                }
            };
            stmts.push(syn::Stmt::Expr(tail, None));
        } else {
            stmts.push(parse_quote! {
                if let Err(__fprof_panic) = __fprof_result {
                    std::panic::resume_unwind(__fprof_panic);
                }
            });
        }
        node.block.stmts = stmts;
    }
}

/// Best-effort name for the self type of an `impl` block.
fn type_ident(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
            .unwrap_or_else(|| "_".to_string()),
        _ => "_".to_string(),
    }
}
