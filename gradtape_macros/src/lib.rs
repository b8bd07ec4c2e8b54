//! Procedural macros that stamp out families of near-identical impl blocks.
//!
//! `expand_impl` clones an impl block once per operation listed in its
//! attribute, renaming methods that contain `operation`, rewriting calls to
//! `placeholder` into calls to the operation, substituting the operation's
//! name into `"operation"` string literals and marginalizing generics bound
//! with `T=Concrete`. `define_closure` then swaps the placeholder
//! backward closure `|| ()` of one generated method for its real body.

extern crate proc_macro;
use proc_macro::TokenStream;
use proc_macro2::Ident;

use quote::quote;
use syn::punctuated::Punctuated;
use syn::token::Where;
use syn::visit_mut::VisitMut;
use syn::{parse_macro_input, ImplItem, ItemImpl, WhereClause};

mod syntax;
use syntax::*;

mod search_replace;
use search_replace::*;

#[proc_macro_attribute]
pub fn expand_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    // Parse input and impl block.
    let operation_sequence = parse_macro_input!(attr as OperationSequence);
    let item = parse_macro_input!(item as ItemImpl);

    let mut impl_blocks = Vec::new();

    // Apply changes corresponding to each operation in the sequence.
    for operation in operation_sequence.iter() {
        let name = match &operation.alias {
            Some(alias) => alias,
            None => &operation.ident,
        };
        let mut impl_block = item.clone();

        // Visitor that replaces calls to `placeholder` by the operation's name.
        let mut placeholder_visitor = FindReplacePlaceholder {
            find: Ident::new("placeholder", operation.ident.span()),
            replace: operation.ident.clone(),
        };

        // Visitor that writes the method's name into `"operation"` literals.
        let mut literal_visitor = FindReplaceLitStr {
            find: "operation".to_string(),
            replace: format!("{}", name),
        };

        // For all bounds:
        // - Add trait bound if specified by the operation.
        // - Marginalize generic if an equality bound is specified instead.
        if let Some(bounds) = &operation.bounds {
            for bound in bounds.iter() {
                match bound {
                    OperationBound::Type(trait_bound) => {
                        impl_block.generics.where_clause =
                            if let Some(mut where_clause) = impl_block.generics.where_clause {
                                where_clause.predicates.push(trait_bound.clone());
                                Some(where_clause)
                            } else {
                                let mut predicates = Punctuated::new();
                                predicates.push(trait_bound.clone());

                                Some(WhereClause {
                                    where_token: Where::default(),
                                    predicates,
                                })
                            }
                    }
                    OperationBound::Eq(margin) => {
                        let mut generics_visitor = RemoveGenerics {
                            find: margin.lhs_ty.clone(),
                        };
                        let mut type_visitor = FindReplaceType {
                            find: margin.lhs_ty.clone(),
                            replace: margin.rhs_ty.clone(),
                        };
                        generics_visitor.visit_item_impl_mut(&mut impl_block);
                        type_visitor.visit_item_impl_mut(&mut impl_block);
                    }
                }
            }
        }

        // Adapt all methods to the operation.
        for impl_item in impl_block.items.iter_mut() {
            if let ImplItem::Method(method) = impl_item {
                // If the method's name contains `operation`, replace it with the operation name.
                let mut method_name = format!("{}", method.sig.ident);
                if let Some(position) = method_name.find("operation") {
                    method_name.replace_range(position..position + 9, &format!("{}", name));
                    method.sig.ident = Ident::new(&method_name, method.sig.ident.span());
                }

                placeholder_visitor.visit_block_mut(&mut method.block);
                literal_visitor.visit_block_mut(&mut method.block);
            }
        }

        impl_blocks.push(impl_block);
    }

    let result = quote! {
        #(#impl_blocks)*
    };
    result.into()
}

#[proc_macro_attribute]
pub fn define_closure(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr = parse_macro_input!(attr as ClosureDefinition);
    let mut item = parse_macro_input!(item as ItemImpl);

    for impl_item in item.items.iter_mut() {
        if let ImplItem::Method(method) = impl_item {
            if attr.fn_name == method.sig.ident {
                let mut visitor = ReplaceExprClosure {
                    replace: attr.closure,
                };

                visitor.visit_block_mut(&mut method.block);
                break;
            }
        }
    }

    let result = quote! {
        #item
    };
    result.into()
}
