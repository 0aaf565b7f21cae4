use proc_macro::TokenStream;
use proc_macro_error::{abort, proc_macro_error};
use quote::{format_ident, quote};
use syn::{
    parse_macro_input, punctuated::Punctuated, FnArg, Ident, ItemFn, Lit, Meta, Pat, PatType,
    PathArguments, ReturnType, Token, Type,
};

const NAME: &str = "name";

/// Turn an async function into a memoized router worker.
///
/// ```ignore
/// #[worker]
/// async fn fib(ctx: &WorkerCtx, n: u64) -> anyhow::Result<u64> {
///     if n < 2 {
///         return Ok(1);
///     }
///     Ok(FibWorker::request(ctx, n - 1).await? + FibWorker::request(ctx, n - 2).await?)
/// }
/// ```
///
/// The function is kept as written. Alongside it a unit struct `FibWorker`
/// is generated that implements `Worker` under the name `"fib"` (override
/// with `#[worker(name = "...")]`), plus `FibWorker::key(..)` and
/// `FibWorker::request(from, ..)` which always routes through the router.
#[proc_macro_attribute]
#[proc_macro_error]
pub fn worker(attr: TokenStream, item: TokenStream) -> TokenStream {
    let attr_args =
        syn::parse::Parser::parse2(Punctuated::<Meta, Token![,]>::parse_terminated, attr.into())
            .unwrap_or_else(|e| abort!(e.span(), "Failed to parse worker attributes: {}", e));

    let mut name_override: Option<String> = None;
    for meta in &attr_args {
        match meta {
            Meta::NameValue(nv) if nv.path.is_ident(NAME) => {
                if let syn::Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(lit) = &expr_lit.lit {
                        name_override = Some(lit.value());
                    } else {
                        abort!(expr_lit, "Expected a string literal for name");
                    }
                } else {
                    abort!(nv.value, "Expected a string literal for name");
                }
            }
            other => abort!(other, "Unsupported worker attribute, expected `name = \"...\"`"),
        }
    }

    let input = parse_macro_input!(item as ItemFn);
    if input.sig.asyncness.is_none() {
        abort!(input.sig.fn_token, "#[worker] functions must be async");
    }

    let fn_name = &input.sig.ident;
    let fn_vis = &input.vis;
    let worker_name = name_override.unwrap_or_else(|| fn_name.to_string());
    if worker_name.is_empty() {
        abort!(fn_name, "worker name cannot be empty");
    }
    let struct_name = format_ident!("{}Worker", camel_case(&fn_name.to_string()));

    let mut params = input.sig.inputs.iter();
    match params.next() {
        Some(FnArg::Typed(_)) => {}
        Some(FnArg::Receiver(receiver)) => {
            abort!(receiver, "#[worker] cannot be applied to methods")
        }
        None => abort!(
            input.sig,
            "#[worker] functions take `ctx: &WorkerCtx` as their first parameter"
        ),
    }

    let mut arg_names: Vec<Ident> = Vec::new();
    let mut arg_types: Vec<Type> = Vec::new();
    for arg in params {
        match arg {
            FnArg::Typed(PatType { pat, ty, .. }) => match pat.as_ref() {
                Pat::Ident(pat_ident) => {
                    arg_names.push(pat_ident.ident.clone());
                    arg_types.push((**ty).clone());
                }
                other => abort!(other, "#[worker] parameters must be plain identifiers"),
            },
            FnArg::Receiver(receiver) => {
                abort!(receiver, "#[worker] cannot be applied to methods")
            }
        }
    }

    let output_type = match &input.sig.output {
        ReturnType::Type(_, ty) => ok_type(ty)
            .unwrap_or_else(|| abort!(ty, "#[worker] functions must return a Result")),
        ReturnType::Default => abort!(input.sig, "#[worker] functions must return a Result"),
    };

    let doc = format!("Memoized worker `{}` generated from `{}`.", worker_name, fn_name);

    let expanded: proc_macro2::TokenStream = quote! {
        #input

        #[doc = #doc]
        #[derive(Debug, Clone, Copy, Default)]
        #fn_vis struct #struct_name;

        impl #struct_name {
            pub const NAME: &'static str = #worker_name;

            /// Router key for these arguments
            pub fn key(#(#arg_names: #arg_types),*) -> ::memo_router::Result<::memo_router::Key> {
                ::memo_router::Key::new(Self::NAME, &(#(#arg_names,)*))
            }

            /// Request this computation through the router on behalf of `from`
            pub async fn request<R>(
                from: &R,
                #(#arg_names: #arg_types),*
            ) -> ::memo_router::Result<#output_type>
            where
                R: ::memo_router::Requester + ?Sized,
            {
                from.router()
                    .get_as(from.requester_key(), Self::NAME, &(#(#arg_names,)*))
                    .await
            }
        }

        #[::memo_router::async_trait]
        impl ::memo_router::Worker for #struct_name {
            fn name(&self) -> &str {
                Self::NAME
            }

            async fn run(
                &self,
                ctx: &::memo_router::WorkerCtx,
            ) -> ::memo_router::anyhow::Result<::memo_router::Value> {
                let (#(#arg_names,)*): (#(#arg_types,)*) = ctx.args()?;
                let output = #fn_name(ctx, #(#arg_names),*)
                    .await
                    .map_err(::memo_router::anyhow::Error::from)?;
                Ok(::memo_router::encode(Self::NAME, &output)?)
            }
        }
    };

    TokenStream::from(expanded)
}

/// `T` out of `Result<T, E>` or an alias such as `anyhow::Result<T>`
fn ok_type(ty: &Type) -> Option<Type> {
    let Type::Path(type_path) = ty else {
        return None;
    };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Result" {
        return None;
    }
    match &segment.arguments {
        PathArguments::AngleBracketed(args) => match args.args.first()? {
            syn::GenericArgument::Type(inner) => Some(inner.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn camel_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
