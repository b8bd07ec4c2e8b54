use proc_macro2::Ident;
use std::ops::Deref;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::token::{As, Colon, Comma, Eq, Gt, Lt};
use syn::{Error, ExprClosure, Result, Type, WherePredicate};

/// `T=f64` inside an operation's angle brackets.
pub struct EqPredicate {
    pub lhs_ty: Ident,
    pub rhs_ty: Type,
}

impl Parse for EqPredicate {
    fn parse(input: ParseStream) -> Result<Self> {
        let lhs_ty = input.parse()?;
        input.parse::<Eq>()?;
        Ok(EqPredicate {
            lhs_ty,
            rhs_ty: input.parse()?,
        })
    }
}

pub enum OperationBound {
    Type(WherePredicate),
    Eq(EqPredicate),
}

impl Parse for OperationBound {
    fn parse(input: ParseStream) -> Result<Self> {
        if input.peek2(Eq) {
            Ok(OperationBound::Eq(input.parse()?))
        } else {
            Ok(OperationBound::Type(input.parse()?))
        }
    }
}

/// One entry of an operation sequence: `ident<bounds> as alias`.
/// Both the bounds and the alias are optional.
pub struct Operation {
    pub ident: Ident,
    pub bounds: Option<Punctuated<OperationBound, Comma>>,
    pub alias: Option<Ident>,
}

impl Parse for Operation {
    fn parse(input: ParseStream) -> Result<Self> {
        let ident = input.parse()?;

        let bounds = if input.peek(Lt) {
            let _lt_token: Lt = input.parse()?;
            let mut args = Punctuated::new();
            loop {
                if input.peek(Gt) {
                    break;
                }
                let value = input.parse()?;
                args.push_value(value);
                if input.peek(Gt) {
                    break;
                }
                let punct = input.parse()?;
                args.push_punct(punct);
            }
            let _gt_token: Gt = input.parse()?;

            Some(args)
        } else {
            None
        };

        let alias = if input.peek(As) {
            let _as_token: As = input.parse()?;
            Some(input.parse()?)
        } else {
            None
        };

        Ok(Operation {
            ident,
            bounds,
            alias,
        })
    }
}

pub struct OperationSequence {
    pub sequence: Punctuated<Operation, Comma>,
}

impl Parse for OperationSequence {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(OperationSequence {
            sequence: Punctuated::parse_terminated(input)?,
        })
    }
}

impl Deref for OperationSequence {
    type Target = Punctuated<Operation, Comma>;
    fn deref(&self) -> &Self::Target {
        &self.sequence
    }
}

/// `fn_name: move || { ... }` as written inside `#[define_closure(...)]`.
pub struct ClosureDefinition {
    pub fn_name: Ident,
    pub closure: ExprClosure,
}

impl Parse for ClosureDefinition {
    fn parse(input: ParseStream) -> Result<Self> {
        let fn_name = input.parse()?;
        input.parse::<Colon>()?;
        let closure: ExprClosure = input.parse()?;
        if !closure.inputs.is_empty() {
            return Err(Error::new_spanned(
                &closure.inputs,
                "backward closures take no arguments",
            ));
        }

        Ok(ClosureDefinition { fn_name, closure })
    }
}
