use proc_macro2::Ident;
use std::iter::FromIterator;
use syn::punctuated::Punctuated;
use syn::visit_mut::{self, VisitMut};
use syn::{Expr, ExprCall, ExprClosure, ExprMethodCall, GenericParam, Generics, LitStr, Type};

/// Renames `x.placeholder(..)` and `path::placeholder(..)` calls.
pub struct FindReplacePlaceholder {
    pub find: Ident,
    pub replace: Ident,
}

/// Rewrites `find` inside string literals, so that generated methods can
/// name themselves in error messages.
pub struct FindReplaceLitStr {
    pub find: String,
    pub replace: String,
}

/// Substitutes a concrete type for a generic type parameter.
pub struct FindReplaceType {
    pub find: Ident,
    pub replace: Type,
}

pub struct RemoveGenerics {
    pub find: Ident,
}

/// Replaces argument-less closures, `|| ()` by convention, with `replace`.
pub struct ReplaceExprClosure {
    pub replace: ExprClosure,
}

impl VisitMut for FindReplacePlaceholder {
    fn visit_expr_method_call_mut(&mut self, node: &mut ExprMethodCall) {
        if node.method == self.find {
            node.method = self.replace.clone();
        }
        visit_mut::visit_expr_method_call_mut(self, node);
    }

    fn visit_expr_call_mut(&mut self, node: &mut ExprCall) {
        if let Expr::Path(expr_path) = &mut *node.func {
            if let Some(segment) = expr_path.path.segments.last_mut() {
                if segment.ident == self.find {
                    segment.ident = self.replace.clone();
                }
            }
        }
        visit_mut::visit_expr_call_mut(self, node);
    }
}

impl VisitMut for FindReplaceLitStr {
    fn visit_lit_str_mut(&mut self, node: &mut LitStr) {
        let value = node.value();
        if value.contains(&self.find) {
            *node = LitStr::new(&value.replace(&self.find, &self.replace), node.span());
        }
    }
}

impl VisitMut for FindReplaceType {
    fn visit_type_mut(&mut self, node: &mut Type) {
        if let Type::Path(type_path) = node {
            if type_path.qself.is_none() && type_path.path.is_ident(&self.find) {
                *node = self.replace.clone();
                return;
            }
        }

        visit_mut::visit_type_mut(self, node);
    }
}

impl VisitMut for RemoveGenerics {
    fn visit_generics_mut(&mut self, node: &mut Generics) {
        node.params = Punctuated::from_iter(
            node.params
                .iter()
                .filter(|x| {
                    if let GenericParam::Type(type_param) = &x {
                        return type_param.ident != self.find;
                    }

                    true
                })
                .cloned(),
        );

        visit_mut::visit_generics_mut(self, node);
    }
}

impl VisitMut for ReplaceExprClosure {
    fn visit_expr_mut(&mut self, node: &mut Expr) {
        if let Expr::Closure(closure) = node {
            if closure.inputs.is_empty() {
                *closure = self.replace.clone();
                return;
            }
        }

        visit_mut::visit_expr_mut(self, node);
    }
}
