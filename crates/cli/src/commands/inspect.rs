//! Module for the `inspect` subcommand: loads a module and prints a
//! structural summary for eyeballing protection results.

use crate::commands::Command;
use clap::Args;
use std::error::Error;
use std::path::PathBuf;
use umbra_core::{JsonModuleIo, ModuleIo, Op};

/// Arguments for the `inspect` subcommand.
#[derive(Args)]
pub struct InspectArgs {
    /// Module path.
    pub input: PathBuf,
    /// Also list every method with its instruction count.
    #[arg(long)]
    methods: bool,
    /// Also list string literals still present in bodies.
    #[arg(long)]
    strings: bool,
}

impl Command for InspectArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let module = JsonModuleIo::new().load(&self.input)?;

        let bodies = module.methods.iter().filter(|m| m.body.is_some()).count();
        let instructions: usize = module
            .methods
            .iter()
            .filter_map(|m| m.body.as_ref())
            .map(|b| b.len())
            .sum();
        let literals: Vec<&str> = module
            .methods
            .iter()
            .filter_map(|m| m.body.as_ref())
            .flat_map(|b| &b.instrs)
            .filter_map(|i| match &i.op {
                Op::LdStr(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();

        println!("module {}", module.name);
        println!("  types:        {}", module.types.len());
        println!("  methods:      {} ({bodies} with bodies)", module.methods.len());
        println!("  fields:       {}", module.fields.len());
        println!("  properties:   {}", module.properties.len());
        println!("  events:       {}", module.events.len());
        println!("  ext refs:     {}", module.ext_refs.len());
        println!("  instructions: {instructions}");
        println!("  string loads: {}", literals.len());
        println!("  attributes:   {}", module.attributes.len());

        if self.methods {
            println!();
            for (index, method) in module.methods.iter().enumerate() {
                let id = umbra_core::MethodId(index as u32);
                let len = method.body.as_ref().map_or(0, |b| b.len());
                println!("  {:>4} {} ({len} instrs)", index, module.method_full_name(id));
            }
        }
        if self.strings {
            println!();
            for literal in literals {
                println!("  {literal:?}");
            }
        }
        Ok(())
    }
}
