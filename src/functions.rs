use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

pub type FunctionImpl = fn(&[String]) -> String;

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub implementation: FunctionImpl,
}

/// Inline functions callable as `:[name(args)]`.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDef>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("random", random);
        registry.register("randint", randint);
        registry
    }

    pub fn register(&mut self, name: &str, implementation: FunctionImpl) {
        self.functions.insert(
            name.to_lowercase(),
            FunctionDef {
                name: name.to_string(),
                implementation,
            },
        );
    }

    pub fn resolve(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(&name.to_lowercase())
    }

    pub fn call(&self, name: &str, args: &[String]) -> Option<String> {
        self.resolve(name).map(|def| (def.implementation)(args))
    }
}

/// One of the arguments, uniformly.
fn random(args: &[String]) -> String {
    args.choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_default()
}

/// Integer in `[min, max]`; bounds may be given in either order.
fn randint(args: &[String]) -> String {
    let bounds: Vec<i64> = args
        .iter()
        .take(2)
        .filter_map(|arg| arg.trim().parse::<f64>().ok())
        .map(|n| n.trunc() as i64)
        .collect();

    match bounds.as_slice() {
        [a, b] => {
            let (low, high) = if a <= b { (*a, *b) } else { (*b, *a) };
            rand::thread_rng().gen_range(low..=high).to_string()
        }
        _ => String::new(),
    }
}
