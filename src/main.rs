use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use nacre::codegen::codebuf::CodeBuffer;
use nacre::codegen::emit::{Emitter, RecordingEmitter};
use nacre::codegen::generic::{
    ContextSource, DictionaryOwner, GenericContext, GenericLookupResult, GenericLookupStub,
    GenericStubKind,
};
use nacre::codegen::helpers::{DelegateCtorInfo, HelperRequest};
use nacre::codegen::stubs::{ConstantArgThunk, ImportTrampoline, JumpStub, UnboxingStub};
use nacre::codegen::symbols::{FixedResolver, MethodRef, Symbol, SymbolResolver, TypeRef};
use nacre::codegen::x64::X64Emitter;
use nacre::{CompilationPass, TargetConfig, TargetOs, TargetRegisterMap};

// Wrapper types for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OsArg {
    Windows,
    Linux,
    Macos,
}

impl From<OsArg> for TargetOs {
    fn from(arg: OsArg) -> Self {
        match arg {
            OsArg::Windows => TargetOs::Windows,
            OsArg::Linux => TargetOs::Linux,
            OsArg::Macos => TargetOs::Macos,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum PassArg {
    RelocsOnly,
    Final,
}

impl From<PassArg> for CompilationPass {
    fn from(arg: PassArg) -> Self {
        match arg {
            PassArg::RelocsOnly => CompilationPass::RelocsOnly,
            PassArg::Final => CompilationPass::Final,
        }
    }
}

/// Stub kinds the dump command can emit over fixture references.
#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum HelperArg {
    NewObject,
    NewArray,
    IsInstanceOf,
    CastClass,
    VirtualCall,
    ResolveVirtualFunction,
    ResolveGenericVirtualMethod,
    NonGcStaticBase,
    GcStaticBase,
    ThreadStaticBase,
    TypeHandle,
    MethodDictionary,
    MethodEntry,
    DelegateCtor,
    GenericNonGcStaticBase,
    GenericGcStaticBase,
    GenericThreadStaticBase,
    JumpStub,
    UnboxingStub,
    ImportTrampoline,
    ConstantArgThunk,
}

#[derive(Parser)]
#[command(name = "nacre")]
#[command(about = "Helper-stub emission backend for a managed runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Emit a helper stub over fixture references and print it
    Dump {
        /// Which stub to emit
        #[arg(long, value_enum)]
        helper: HelperArg,

        /// Target OS family (defaults to the host)
        #[arg(long, value_enum)]
        os: Option<OsArg>,

        /// Emission pass
        #[arg(long, value_enum, default_value = "final")]
        pass: PassArg,

        /// Give the fixture type a deferred initializer
        #[arg(long)]
        lazy_init: bool,

        /// Make the fixture method an interface method
        #[arg(long)]
        interface: bool,

        /// Also print the encoded bytes, relocations and step-in points
        #[arg(long)]
        bytes: bool,

        /// Print the operation stream as JSON
        #[arg(long)]
        json: bool,

        /// Target description file (target.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the calling-convention register map for an OS family
    Regmap {
        /// Target OS family (defaults to the host)
        #[arg(long, value_enum)]
        os: Option<OsArg>,
    },
}

// Fixture references the dump command emits against.
const DEMO_TYPE: TypeRef = TypeRef(1);
const DEMO_METHOD: MethodRef = MethodRef(1);

fn demo_resolver(lazy_init: bool, interface: bool) -> FixedResolver {
    let owner = DictionaryOwner::Type(DEMO_TYPE);
    let mut resolver = FixedResolver::new()
        .with_vtable_slot(DEMO_METHOD, 3)
        .with_dictionary_vtable_slot(DEMO_TYPE, 1)
        .with_dictionary_slot(owner, GenericLookupResult::TypeHandle(DEMO_TYPE), 2)
        .with_dictionary_slot(owner, GenericLookupResult::NonGcStaticBase(DEMO_TYPE), 3)
        .with_dictionary_slot(owner, GenericLookupResult::GcStaticBase(DEMO_TYPE), 4)
        .with_dictionary_slot(owner, GenericLookupResult::ThreadStaticIndex(DEMO_TYPE), 5)
        .with_dictionary_slot(
            DictionaryOwner::Method(DEMO_METHOD),
            GenericLookupResult::MethodDictionary(DEMO_METHOD),
            6,
        )
        .with_dictionary_slot(
            DictionaryOwner::Method(DEMO_METHOD),
            GenericLookupResult::MethodEntry(DEMO_METHOD),
            7,
        );
    if lazy_init {
        resolver = resolver.with_lazy_initializer(DEMO_TYPE);
    }
    if interface {
        resolver = resolver.with_interface_method(DEMO_METHOD);
    }
    resolver
}

fn type_context() -> GenericContext {
    GenericContext {
        owner: DictionaryOwner::Type(DEMO_TYPE),
        source: ContextSource::TypeVtable,
    }
}

fn method_context() -> GenericContext {
    GenericContext {
        owner: DictionaryOwner::Method(DEMO_METHOD),
        source: ContextSource::Explicit,
    }
}

/// Emit the chosen stub into `out`.
fn emit_demo(
    helper: HelperArg,
    pass: CompilationPass,
    regs: &TargetRegisterMap,
    resolver: &FixedResolver,
    out: &mut dyn Emitter,
) {
    let request = match helper {
        HelperArg::NewObject => HelperRequest::NewObject { ty: DEMO_TYPE },
        HelperArg::NewArray => HelperRequest::NewArray { ty: DEMO_TYPE },
        HelperArg::IsInstanceOf => HelperRequest::IsInstanceOf { ty: DEMO_TYPE },
        HelperArg::CastClass => HelperRequest::CastClass { ty: DEMO_TYPE },
        HelperArg::VirtualCall => HelperRequest::VirtualCall { method: DEMO_METHOD },
        HelperArg::ResolveVirtualFunction => {
            HelperRequest::ResolveVirtualFunction { method: DEMO_METHOD }
        }
        HelperArg::ResolveGenericVirtualMethod => {
            HelperRequest::ResolveGenericVirtualMethod { method: DEMO_METHOD }
        }
        HelperArg::NonGcStaticBase => HelperRequest::GetNonGcStaticBase { ty: DEMO_TYPE },
        HelperArg::GcStaticBase => HelperRequest::GetGcStaticBase { ty: DEMO_TYPE },
        HelperArg::ThreadStaticBase => HelperRequest::GetThreadStaticBase { ty: DEMO_TYPE },
        HelperArg::TypeHandle => HelperRequest::TypeHandle {
            ty: DEMO_TYPE,
            context: type_context(),
        },
        HelperArg::MethodDictionary => HelperRequest::MethodDictionary {
            method: DEMO_METHOD,
            context: method_context(),
        },
        HelperArg::MethodEntry => HelperRequest::MethodEntry {
            method: DEMO_METHOD,
            context: method_context(),
        },
        HelperArg::DelegateCtor => HelperRequest::DelegateCtor(DelegateCtorInfo {
            constructor: Symbol::new("delegate_ctor_closed"),
            target_method: resolver.method_entry_symbol(DEMO_METHOD),
            invoke_thunk: Some(Symbol::new("invoke_thunk_m1")),
            constructor_arity: 3,
        }),

        HelperArg::GenericNonGcStaticBase => {
            return GenericLookupStub {
                context: type_context(),
                kind: GenericStubKind::NonGcStaticBase(DEMO_TYPE),
            }
            .emit(pass, regs, resolver, out);
        }
        HelperArg::GenericGcStaticBase => {
            return GenericLookupStub {
                context: type_context(),
                kind: GenericStubKind::GcStaticBase(DEMO_TYPE),
            }
            .emit(pass, regs, resolver, out);
        }
        HelperArg::GenericThreadStaticBase => {
            return GenericLookupStub {
                context: type_context(),
                kind: GenericStubKind::ThreadStaticBase(DEMO_TYPE),
            }
            .emit(pass, regs, resolver, out);
        }

        HelperArg::JumpStub => {
            return JumpStub {
                target: resolver.method_entry_symbol(DEMO_METHOD),
            }
            .emit(out);
        }
        HelperArg::UnboxingStub => {
            return UnboxingStub {
                target: resolver.method_entry_symbol(DEMO_METHOD),
            }
            .emit(regs, resolver, out);
        }
        HelperArg::ImportTrampoline => {
            return ImportTrampoline {
                import: resolver.extern_symbol("host_write"),
            }
            .emit(out);
        }
        HelperArg::ConstantArgThunk => {
            return ConstantArgThunk {
                constant: 42,
                target: resolver.extern_symbol("rt_shared_throw_helper"),
            }
            .emit(regs, out);
        }
    };
    request.emit(pass, regs, resolver, out);
}

fn resolve_os(arg: Option<OsArg>, config: &TargetConfig) -> TargetOs {
    match arg {
        Some(os) => os.into(),
        None => config.os,
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_dump(
    helper: HelperArg,
    os: Option<OsArg>,
    pass: PassArg,
    lazy_init: bool,
    interface: bool,
    bytes: bool,
    json: bool,
    config: Option<PathBuf>,
) -> Result<(), String> {
    let config = match config {
        Some(path) => TargetConfig::load(&path)?,
        None => TargetConfig::default(),
    };
    let os = resolve_os(os, &config);
    let pass: CompilationPass = pass.into();
    let regs = TargetRegisterMap::for_os(os);
    let resolver = demo_resolver(lazy_init, interface);

    if config.trace_emit {
        eprintln!("emitting {:?} for {:?} ({:?})", helper, os, pass);
    }

    let mut rec = RecordingEmitter::new();
    emit_demo(helper, pass, &regs, &resolver, &mut rec);

    if json {
        let text = serde_json::to_string_pretty(rec.ops())
            .map_err(|e| format!("failed to serialize operations: {}", e))?;
        println!("{}", text);
    } else {
        for (i, op) in rec.ops().iter().enumerate() {
            println!("{:3}: {:?}", i, op);
        }
        if rec.ops().is_empty() {
            println!("(no operations emitted in this pass)");
        }
    }

    if bytes {
        let mut buf = CodeBuffer::new();
        let mut asm = X64Emitter::new(&mut buf);
        emit_demo(helper, pass, &regs, &resolver, &mut asm);

        let hex: Vec<String> = buf.code().iter().map(|b| format!("{:02X}", b)).collect();
        println!("bytes: {}", hex.join(" "));
        for reloc in buf.relocs() {
            println!(
                "reloc @ {:#06x}: {} ({:?})",
                reloc.offset, reloc.symbol, reloc.kind
            );
        }
        for point in buf.step_in_points() {
            println!("step-in @ {:#06x}", point);
        }
    }

    Ok(())
}

fn cmd_regmap(os: Option<OsArg>) -> Result<(), String> {
    let os = resolve_os(os, &TargetConfig::default());
    let regs = TargetRegisterMap::for_os(os);
    println!("{:?}:", os);
    println!("  arg0   = {:?}", regs.arg0);
    println!("  arg1   = {:?}", regs.arg1);
    println!("  arg2   = {:?}", regs.arg2);
    println!("  arg3   = {:?}", regs.arg3);
    println!("  result = {:?}", regs.result);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Dump {
            helper,
            os,
            pass,
            lazy_init,
            interface,
            bytes,
            json,
            config,
        } => cmd_dump(helper, os, pass, lazy_init, interface, bytes, json, config),
        Commands::Regmap { os } => cmd_regmap(os),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}
