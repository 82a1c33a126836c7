//! Builtin dispatch macros
//!
//! - `#[shell_command(name = "...", usage = "...", description = "...")]` marks
//!   a builtin implementation inside an impl block
//! - `#[shell_commands]` collects the marked functions and generates the
//!   lookup table (`get_command`, `show_help`, `describe`, `list_commands`)

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, Ident, ImplItem, ImplItemFn, ItemImpl, LitStr};

/// Parsed arguments from `#[shell_command(name = "...", usage = "...", description = "...")]`
struct BuiltinAttrArgs {
    name: String,
    usage: String,
    description: String,
}

impl syn::parse::Parse for BuiltinAttrArgs {
    fn parse(input: syn::parse::ParseStream) -> syn::Result<Self> {
        let mut name = None;
        let mut usage = None;
        let mut description = None;

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<syn::Token![=]>()?;
            let value: LitStr = input.parse()?;

            match ident.to_string().as_str() {
                "name" => name = Some(value.value()),
                "usage" => usage = Some(value.value()),
                "description" => description = Some(value.value()),
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {}", other),
                    ))
                }
            }

            if input.peek(syn::Token![,]) {
                input.parse::<syn::Token![,]>()?;
            }
        }

        Ok(BuiltinAttrArgs {
            name: name.ok_or_else(|| syn::Error::new(input.span(), "missing `name`"))?,
            usage: usage.ok_or_else(|| syn::Error::new(input.span(), "missing `usage`"))?,
            description: description
                .ok_or_else(|| syn::Error::new(input.span(), "missing `description`"))?,
        })
    }
}

/// Marks a function as a shell builtin.
///
/// Only meaningful inside an impl block annotated with `#[shell_commands]`,
/// which strips the attribute and records its metadata. Used standalone it
/// validates the arguments and passes the function through.
///
/// ```ignore
/// #[shell_command(name = "echo", usage = "echo [STRING]...", description = "Write arguments")]
/// fn cmd_echo(args: Vec<String>, ctx: CommandContext) -> BuiltinFuture { ... }
/// ```
#[proc_macro_attribute]
pub fn shell_command(attr: TokenStream, item: TokenStream) -> TokenStream {
    if let Err(e) = syn::parse::<BuiltinAttrArgs>(attr) {
        return e.to_compile_error().into();
    }
    item
}

struct BuiltinInfo {
    name: String,
    usage: String,
    description: String,
    method: Ident,
}

fn builtin_attr(attr: &Attribute) -> Option<syn::Result<BuiltinAttrArgs>> {
    if !attr.path().is_ident("shell_command") {
        return None;
    }
    Some(attr.parse_args())
}

/// Generates the builtin lookup table for an impl block.
///
/// ```ignore
/// #[shell_commands]
/// impl CoreCommands {
///     #[shell_command(name = "true", usage = "true", description = "Succeed")]
///     fn cmd_true(args: Vec<String>, ctx: CommandContext) -> BuiltinFuture { ... }
/// }
/// ```
#[proc_macro_attribute]
pub fn shell_commands(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemImpl);

    let mut builtins: Vec<BuiltinInfo> = Vec::new();
    let mut methods: Vec<ImplItemFn> = Vec::new();
    let mut other_items: Vec<ImplItem> = Vec::new();

    for item in input.items {
        match item {
            ImplItem::Fn(mut method) => {
                if let Some(parsed) = method.attrs.iter().find_map(builtin_attr) {
                    match parsed {
                        Ok(args) => builtins.push(BuiltinInfo {
                            name: args.name,
                            usage: args.usage,
                            description: args.description,
                            method: method.sig.ident.clone(),
                        }),
                        Err(e) => return e.to_compile_error().into(),
                    }
                    method.attrs.retain(|a| !a.path().is_ident("shell_command"));
                }
                methods.push(method);
            }
            other => other_items.push(other),
        }
    }

    let get_arms = builtins.iter().map(|b| {
        let name = &b.name;
        let method = &b.method;
        quote! { #name => Some(Self::#method as crate::shell::commands::BuiltinFn) }
    });

    let help_arms = builtins.iter().map(|b| {
        let name = &b.name;
        let help_text = format!("Usage: {}\n\n{}", b.usage, b.description);
        quote! { #name => Some(#help_text) }
    });

    let descriptions = builtins.iter().map(|b| {
        let name = &b.name;
        let description = &b.description;
        quote! { (#name, #description) }
    });

    let names: Vec<_> = builtins.iter().map(|b| &b.name).collect();

    let self_ty = &input.self_ty;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let output = quote! {
        impl #impl_generics #self_ty #ty_generics #where_clause {
            #(#methods)*

            #(#other_items)*

            /// Look up a builtin by name.
            pub fn get_command(name: &str) -> Option<crate::shell::commands::BuiltinFn> {
                match name {
                    #(#get_arms,)*
                    _ => None,
                }
            }

            /// Usage text for `name --help`.
            pub fn show_help(name: &str) -> Option<&'static str> {
                match name {
                    #(#help_arms,)*
                    _ => None,
                }
            }

            /// `(name, description)` pairs in declaration order.
            pub fn describe() -> &'static [(&'static str, &'static str)] {
                &[#(#descriptions),*]
            }

            /// Names of every builtin in this block.
            pub fn list_commands() -> &'static [&'static str] {
                &[#(#names),*]
            }
        }
    };

    output.into()
}
