//! String-literal encryption.
//!
//! Every eligible `ldstr` is replaced by a load of a module-static ciphertext
//! blob plus a call into a decryptor type injected into the module's global
//! namespace. Identical literals share one ciphertext, which is why every
//! algorithm here is deterministic per run.

use crate::config::EncryptionAlgorithm;
use crate::context::{EncryptedString, RunState};
use crate::diagnostics::Diagnostic;
use crate::naming::{NameAllocator, NameKind, NameScope};
use crate::{Pass, Result};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;
use umbra_core::{
    FieldDef, FieldId, InstrId, MethodBody, MethodDef, MethodId, Module, Op, Signature, TypeDef,
    TypeSig, Visibility,
};

pub struct StringEncryptionPass;

impl Pass for StringEncryptionPass {
    fn id(&self) -> &'static str {
        "string-encryption"
    }

    fn name(&self) -> &'static str {
        "String encryption"
    }

    fn description(&self) -> &'static str {
        "Replaces inline string literals with encrypted blobs decoded through an injected decryptor"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn conflicts_with(&self) -> &'static [&'static str] {
        // Renamed metadata is the input here, never the other way around.
        &["renaming"]
    }

    fn can_apply(&self, module: &Module) -> bool {
        module.methods.iter().any(|m| {
            m.body
                .as_ref()
                .is_some_and(|b| b.instrs.iter().any(|i| matches!(i.op, Op::LdStr(_))))
        })
    }

    fn apply(&self, module: &mut Module, state: &mut RunState) -> Result<()> {
        if !state.config.encryption.encrypt_strings {
            debug!("string encryption disabled by configuration");
            return Ok(());
        }
        if state.config.encryption.encrypt_methods || state.config.encryption.encrypt_resources {
            state.add_diagnostic(Diagnostic::warning(
                "SE002",
                "method and resource encryption are not available in this build; strings only",
            ));
        }

        let algorithm = state.config.encryption.algorithm;
        // Stream ciphertexts need their per-literal keystream at runtime, so
        // the single-argument decryptor cannot serve them.
        let dynamic = state.config.encryption.dynamic_decryption
            || algorithm == EncryptionAlgorithm::Stream;
        let schedule = derive_key_schedule(state);

        // Phase 1: collect eligible literals and the load sites to rewrite.
        let mut sites: Vec<(MethodId, InstrId, String)> = Vec::new();
        for (index, method) in module.methods.iter().enumerate() {
            let Some(body) = &method.body else { continue };
            for instr in &body.instrs {
                if let Op::LdStr(literal) = &instr.op {
                    if excluded(literal, state) {
                        continue;
                    }
                    sites.push((MethodId(index as u32), instr.id, literal.clone()));
                }
            }
        }
        if sites.is_empty() {
            debug!("no eligible string literals");
            return Ok(());
        }

        for (_, _, literal) in &sites {
            if state.strings.lookup(literal).is_none() {
                let entry = encrypt_literal(algorithm, literal, &schedule, state);
                debug!(
                    "encrypted {} byte literal -> {}..",
                    entry.ciphertext.len(),
                    hex::encode(&entry.ciphertext[..entry.ciphertext.len().min(8)])
                );
                state.strings.insert(entry);
            }
        }

        // Phase 3 first: the decryptor type must exist before substitution
        // can reference its members.
        let decryptor = inject_decryptor(module, state, algorithm, dynamic, &schedule);

        // Phase 2: rewrite each load site in place. Morphing the original
        // instruction keeps its handle, so branch targets and exception
        // regions that point at the load stay valid.
        let mut rewritten = 0usize;
        for (method_id, instr_id, literal) in sites {
            let data_field = decryptor.data_field(&literal);
            let key_field = decryptor.key_field(&literal);
            let body = module.methods[method_id.0 as usize]
                .body
                .as_mut()
                .expect("collected site lost its body");
            let Some(instr) = body.instr_mut(instr_id) else {
                continue;
            };
            instr.op = Op::Ldsfld(data_field);
            let mut anchor = instr_id;
            if dynamic {
                anchor = body
                    .insert_after(anchor, Op::Ldsfld(key_field))
                    .expect("anchor instruction present");
            }
            let _ = body.insert_after(anchor, Op::Call(decryptor.method));
            rewritten += 1;
        }

        state.add_diagnostic(
            Diagnostic::info(
                "SE001",
                format!(
                    "encrypted {} literals across {} load sites",
                    state.strings.len(),
                    rewritten
                ),
            )
            .with_payload(json!({
                "literals": state.strings.len(),
                "sites": rewritten,
            })),
        );
        Ok(())
    }
}

fn excluded(literal: &str, state: &RunState) -> bool {
    literal.chars().count() < 2
        || state.config.is_preserved_prefix(literal)
        || state.config.encryption.excluded_strings.contains(literal)
}

/// 256-bit key schedule: SHA-256 of the caller key, or of bytes drawn from
/// the run's random source when no key is configured.
fn derive_key_schedule(state: &mut RunState) -> [u8; 32] {
    match state.config.encryption.key.clone() {
        Some(key) => sha256(key.as_bytes()),
        None => {
            let drawn = state.rand().next_bytes(32);
            sha256(&drawn)
        }
    }
}

pub(crate) fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Byte-chained block cipher with a zero initialisation vector:
/// `c[i] = p[i] ^ ks[i % 32] ^ prev`, `prev` feeding back the ciphertext.
pub fn encrypt_block(plain: &[u8], schedule: &[u8; 32]) -> Vec<u8> {
    let mut prev = 0u8;
    plain
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let c = p ^ schedule[i % 32] ^ prev;
            prev = c;
            c
        })
        .collect()
}

pub fn decrypt_block(cipher: &[u8], schedule: &[u8; 32]) -> Vec<u8> {
    let mut prev = 0u8;
    cipher
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let p = c ^ schedule[i % 32] ^ prev;
            prev = c;
            p
        })
        .collect()
}

/// Keystream of `len` bytes from ChaCha20 keyed by SHA-256(key ‖ nonce),
/// block counter starting at one.
pub fn stream_keystream(schedule: &[u8; 32], nonce: &[u8; 12], len: usize) -> Vec<u8> {
    let mut material = Vec::with_capacity(44);
    material.extend_from_slice(schedule);
    material.extend_from_slice(nonce);
    let mut rng = ChaCha20Rng::from_seed(sha256(&material));
    rng.set_stream(1);
    let mut keystream = vec![0u8; len];
    rng.fill_bytes(&mut keystream);
    keystream
}

/// `c[i] = p[i] ^ key[i % |key|] ^ (i * 17) mod 256`
pub fn encrypt_custom(plain: &[u8], key: &[u8]) -> Vec<u8> {
    plain
        .iter()
        .enumerate()
        .map(|(i, &p)| p ^ key[i % key.len()] ^ ((i * 17) & 0xff) as u8)
        .collect()
}

/// The custom transform is an involution.
pub fn decrypt_custom(cipher: &[u8], key: &[u8]) -> Vec<u8> {
    encrypt_custom(cipher, key)
}

/// Reference inverse for a registry entry; the injected decryptor body
/// encodes exactly this computation.
pub fn decrypt_reference(entry: &EncryptedString) -> String {
    let plain = match entry.algorithm {
        EncryptionAlgorithm::SymmetricBlock => {
            let mut schedule = [0u8; 32];
            schedule.copy_from_slice(&entry.key);
            decrypt_block(&entry.ciphertext, &schedule)
        }
        EncryptionAlgorithm::Stream => entry
            .ciphertext
            .iter()
            .zip(&entry.key)
            .map(|(c, k)| c ^ k)
            .collect(),
        EncryptionAlgorithm::Custom => decrypt_custom(&entry.ciphertext, &entry.key),
    };
    String::from_utf8_lossy(&plain).into_owned()
}

fn encrypt_literal(
    algorithm: EncryptionAlgorithm,
    literal: &str,
    schedule: &[u8; 32],
    state: &mut RunState,
) -> EncryptedString {
    let plain = literal.as_bytes();
    let (ciphertext, key) = match algorithm {
        EncryptionAlgorithm::SymmetricBlock => {
            (encrypt_block(plain, schedule), schedule.to_vec())
        }
        EncryptionAlgorithm::Stream => {
            let nonce_bytes = state.rand().next_bytes(12);
            let mut nonce = [0u8; 12];
            nonce.copy_from_slice(&nonce_bytes);
            let keystream = stream_keystream(schedule, &nonce, plain.len());
            let cipher = plain
                .iter()
                .zip(&keystream)
                .map(|(p, k)| p ^ k)
                .collect();
            (cipher, keystream)
        }
        EncryptionAlgorithm::Custom => (encrypt_custom(plain, schedule), schedule.to_vec()),
    };
    EncryptedString {
        plaintext: literal.to_string(),
        ciphertext,
        key,
        algorithm,
    }
}

/// Handles to the injected members.
struct Decryptor {
    method: MethodId,
    data_fields: Vec<(String, FieldId)>,
    key_fields: Vec<(String, FieldId)>,
    shared_key_field: Option<FieldId>,
}

impl Decryptor {
    fn data_field(&self, literal: &str) -> FieldId {
        self.data_fields
            .iter()
            .find(|(p, _)| p == literal)
            .map(|(_, f)| *f)
            .expect("literal registered before substitution")
    }

    fn key_field(&self, literal: &str) -> FieldId {
        if let Some(shared) = self.shared_key_field {
            return shared;
        }
        self.key_fields
            .iter()
            .find(|(p, _)| p == literal)
            .map(|(_, f)| *f)
            .expect("literal registered before substitution")
    }
}

/// Synthesises the decryptor type: one static blob field per literal, key
/// material, and a static decryptor method implementing the inverse of the
/// configured algorithm.
fn inject_decryptor(
    module: &mut Module,
    state: &mut RunState,
    algorithm: EncryptionAlgorithm,
    dynamic: bool,
    schedule: &[u8; 32],
) -> Decryptor {
    let mut scope: NameScope = module.types.iter().map(|t| t.name.clone()).collect();
    let mut allocator =
        NameAllocator::new(state.config.renaming.scheme, state.config.renaming.mode);

    let type_name = allocator.mint(state.rand(), &mut scope, NameKind::Type);
    let mut type_def = TypeDef::new("", type_name);
    type_def.visibility = Visibility::Internal;
    type_def.is_sealed = true;
    type_def.is_abstract = true;
    let type_id = module.add_type(type_def);

    let mut member_scope = NameScope::new();
    let mut data_fields = Vec::new();
    let mut key_fields = Vec::new();

    let entries: Vec<(String, Vec<u8>, Vec<u8>)> = state
        .strings
        .iter()
        .map(|e| (e.plaintext.clone(), e.ciphertext.clone(), e.key.clone()))
        .collect();
    for (plaintext, ciphertext, key) in &entries {
        let name = allocator.mint(state.rand(), &mut member_scope, NameKind::Field);
        let mut field = FieldDef::new(name, type_id, TypeSig::Bytes);
        field.is_static = true;
        field.initial_value = Some(ciphertext.clone());
        data_fields.push((plaintext.clone(), module.add_field(field)));

        // Stream entries carry a per-literal keystream; the other algorithms
        // share one schedule field added below.
        if dynamic && algorithm == EncryptionAlgorithm::Stream {
            let name = allocator.mint(state.rand(), &mut member_scope, NameKind::Field);
            let mut field = FieldDef::new(name, type_id, TypeSig::Bytes);
            field.is_static = true;
            field.initial_value = Some(key.clone());
            key_fields.push((plaintext.clone(), module.add_field(field)));
        }
    }

    let shared_key_field = if algorithm != EncryptionAlgorithm::Stream {
        let name = allocator.mint(state.rand(), &mut member_scope, NameKind::Field);
        let mut field = FieldDef::new(name, type_id, TypeSig::Bytes);
        field.is_static = true;
        field.initial_value = Some(schedule.to_vec());
        Some(module.add_field(field))
    } else {
        None
    };

    let utf8 = module.add_ext_ref(umbra_core::ExternalRef {
        assembly: "System.Runtime".into(),
        full_name: "System.Text.Encoding::GetUtf8String".into(),
        params: 1,
        returns_value: true,
    });

    let method_name = allocator.mint(state.rand(), &mut member_scope, NameKind::Method);
    let signature = if dynamic {
        Signature::new(vec![TypeSig::Bytes, TypeSig::Bytes], TypeSig::Str)
    } else {
        Signature::new(vec![TypeSig::Bytes], TypeSig::Str)
    };
    let mut method = MethodDef::new(method_name, type_id, signature);
    method.is_static = true;
    method.body = Some(build_decryptor_body(
        algorithm,
        dynamic,
        shared_key_field,
        utf8,
    ));
    let method = module.add_method(method);

    debug!(
        "injected decryptor type '{}' with {} blobs",
        module.type_(type_id).name,
        entries.len()
    );

    Decryptor {
        method,
        data_fields,
        key_fields,
        shared_key_field,
    }
}

/// Emits the decryption loop. Layout:
///
/// ```text
///   n = cipher.len; out = new byte[n]; i = 0; prev = 0
///   check: if i >= n goto done
///   b = cipher[i]
///   out[i] = (b ^ keybyte(i) ^ chain) as u8
///   prev = b; i = i + 1; goto check
///   done: return utf8(out)
/// ```
///
/// `keybyte` and the chain term differ per algorithm; the loop shell is
/// shared.
fn build_decryptor_body(
    algorithm: EncryptionAlgorithm,
    dynamic: bool,
    shared_key_field: Option<FieldId>,
    utf8: umbra_core::ExtRefId,
) -> MethodBody {
    let mut body = MethodBody::new();
    let out = body.add_local("out", TypeSig::Bytes);
    let i = body.add_local("i", TypeSig::I4);
    let n = body.add_local("n", TypeSig::I4);
    let b = body.add_local("b", TypeSig::I4);
    let prev = body.add_local("prev", TypeSig::I4);

    // Pushes the key array: the second argument under dynamic decryption,
    // the baked schedule field otherwise.
    let push_key_array = |body: &mut MethodBody| {
        if dynamic {
            body.push(Op::Ldarg(1));
        } else {
            body.push(Op::Ldsfld(
                shared_key_field.expect("static decryption bakes a key field"),
            ));
        }
    };

    body.push(Op::Ldarg(0));
    body.push(Op::Ldlen);
    body.push(Op::Stloc(n));
    body.push(Op::Ldloc(n));
    body.push(Op::Newarr);
    body.push(Op::Stloc(out));
    body.push(Op::LdcI4(0));
    body.push(Op::Stloc(i));
    body.push(Op::LdcI4(0));
    body.push(Op::Stloc(prev));

    let check = body.push(Op::Ldloc(i));
    body.push(Op::Ldloc(n));
    let exit_branch = body.push(Op::Bge(InstrId(0))); // patched below

    body.push(Op::Ldarg(0));
    body.push(Op::Ldloc(i));
    body.push(Op::LdelemU1);
    body.push(Op::Stloc(b));

    body.push(Op::Ldloc(out));
    body.push(Op::Ldloc(i));
    body.push(Op::Ldloc(b));

    // keybyte(i)
    push_key_array(&mut body);
    match algorithm {
        EncryptionAlgorithm::SymmetricBlock | EncryptionAlgorithm::Custom => {
            body.push(Op::Ldloc(i));
            body.push(Op::LdcI4(32));
            body.push(Op::Rem);
            body.push(Op::LdelemU1);
        }
        EncryptionAlgorithm::Stream => {
            body.push(Op::Ldloc(i));
            body.push(Op::LdelemU1);
        }
    }
    body.push(Op::Xor);

    match algorithm {
        EncryptionAlgorithm::SymmetricBlock => {
            body.push(Op::Ldloc(prev));
            body.push(Op::Xor);
        }
        EncryptionAlgorithm::Custom => {
            body.push(Op::Ldloc(i));
            body.push(Op::LdcI4(17));
            body.push(Op::Mul);
            body.push(Op::LdcI4(255));
            body.push(Op::And);
            body.push(Op::Xor);
        }
        EncryptionAlgorithm::Stream => {}
    }
    body.push(Op::ConvU1);
    body.push(Op::StelemI1);

    body.push(Op::Ldloc(b));
    body.push(Op::Stloc(prev));

    body.push(Op::Ldloc(i));
    body.push(Op::LdcI4(1));
    body.push(Op::Add);
    body.push(Op::Stloc(i));
    body.push(Op::Br(check));

    let done = body.push(Op::Ldloc(out));
    body.push(Op::CallExt(utf8));
    body.push(Op::Ret);

    if let Some(instr) = body.instr_mut(exit_branch) {
        instr.op = Op::Bge(done);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use umbra_core::{Seed, TypeDef};

    fn module_with_literals(literals: &[&str]) -> Module {
        let mut module = Module::new("app");
        let t = module.add_type(TypeDef::new("App", "Widget"));
        for (idx, lit) in literals.iter().enumerate() {
            let mut method = MethodDef::new(format!("M{idx}"), t, Signature::empty());
            let mut body = MethodBody::new();
            body.push(Op::LdStr(lit.to_string()));
            body.push(Op::Ret);
            method.body = Some(body);
            module.add_method(method);
        }
        module
    }

    fn apply_with(module: &mut Module, config: Configuration) -> RunState {
        let mut state = RunState::new(config);
        StringEncryptionPass.apply(module, &mut state).expect("apply");
        state
    }

    fn seeded_config(algorithm: EncryptionAlgorithm) -> Configuration {
        Configuration::builder()
            .seed(Seed::generate())
            .encryption_algorithm(algorithm)
            .build()
    }

    #[test]
    fn block_round_trip() {
        let schedule = sha256(b"key");
        let cipher = encrypt_block(b"hello world", &schedule);
        assert_ne!(&cipher, b"hello world");
        assert_eq!(decrypt_block(&cipher, &schedule), b"hello world");
    }

    #[test]
    fn block_is_deterministic() {
        let schedule = sha256(b"key");
        assert_eq!(
            encrypt_block(b"same literal", &schedule),
            encrypt_block(b"same literal", &schedule)
        );
    }

    #[test]
    fn custom_round_trip() {
        let schedule = sha256(b"another");
        let cipher = encrypt_custom(b"payload text", &schedule);
        assert_eq!(decrypt_custom(&cipher, &schedule), b"payload text");
    }

    #[test]
    fn stream_keystream_depends_on_nonce() {
        let schedule = sha256(b"k");
        let a = stream_keystream(&schedule, &[0u8; 12], 32);
        let b = stream_keystream(&schedule, &[1u8; 12], 32);
        assert_ne!(a, b);
        // Same inputs reproduce the stream.
        assert_eq!(a, stream_keystream(&schedule, &[0u8; 12], 32));
    }

    #[test]
    fn literal_loads_are_replaced() {
        let mut module = module_with_literals(&["secret text", "other secret"]);
        let state = apply_with(
            &mut module,
            seeded_config(EncryptionAlgorithm::SymmetricBlock),
        );
        assert_eq!(state.strings.len(), 2);

        for method in &module.methods {
            let Some(body) = &method.body else { continue };
            for instr in &body.instrs {
                if let Op::LdStr(s) = &instr.op {
                    panic!("plaintext literal '{s}' survived");
                }
            }
        }
        // A decryptor type landed in the global namespace.
        assert!(module
            .types
            .iter()
            .any(|t| t.namespace.is_empty() && t.is_sealed && t.is_abstract));
    }

    #[test]
    fn duplicate_literals_share_one_ciphertext() {
        let mut module = module_with_literals(&["shared literal", "shared literal"]);
        let state = apply_with(
            &mut module,
            seeded_config(EncryptionAlgorithm::SymmetricBlock),
        );
        assert_eq!(state.strings.len(), 1);
        // One data blob plus the shared key blob.
        let blobs: Vec<_> = module
            .fields
            .iter()
            .filter(|f| f.initial_value.is_some())
            .collect();
        assert_eq!(blobs.len(), 2);
    }

    #[test]
    fn short_and_framework_literals_are_excluded() {
        let mut module = module_with_literals(&["x", "System.String", "real secret"]);
        let state = apply_with(
            &mut module,
            seeded_config(EncryptionAlgorithm::SymmetricBlock),
        );
        assert_eq!(state.strings.len(), 1);
        assert!(state.strings.lookup("real secret").is_some());
    }

    #[test]
    fn registry_entries_decrypt_back_to_plaintext() {
        for algorithm in [
            EncryptionAlgorithm::SymmetricBlock,
            EncryptionAlgorithm::Stream,
            EncryptionAlgorithm::Custom,
        ] {
            let mut module = module_with_literals(&["round trip value"]);
            let state = apply_with(&mut module, seeded_config(algorithm));
            let entry = state.strings.lookup("round trip value").unwrap();
            assert_ne!(entry.ciphertext, b"round trip value");
            assert_eq!(decrypt_reference(entry), "round trip value");
        }
    }

    #[test]
    fn substitution_preserves_net_stack_effect() {
        let mut module = module_with_literals(&["stack balance"]);
        apply_with(&mut module, seeded_config(EncryptionAlgorithm::Stream));
        let body = module.methods[0].body.as_ref().unwrap();
        // Everything before the final ret nets exactly one pushed string.
        let delta = body.stack_delta_of_range(&module, 0, body.len() - 1);
        assert_eq!(delta, 1);
    }

    #[test]
    fn decryptor_body_references_resolve() {
        let mut module = module_with_literals(&["branch targets"]);
        apply_with(&mut module, seeded_config(EncryptionAlgorithm::SymmetricBlock));
        for method in &module.methods {
            if let Some(body) = &method.body {
                assert!(body.references_resolve());
            }
        }
    }

    #[test]
    fn can_apply_false_without_string_loads() {
        let mut module = Module::new("app");
        let t = module.add_type(TypeDef::new("App", "Widget"));
        let mut method = MethodDef::new("Run", t, Signature::empty());
        let mut body = MethodBody::new();
        body.push(Op::LdcI4(1));
        body.push(Op::Pop);
        body.push(Op::Ret);
        method.body = Some(body);
        module.add_method(method);
        assert!(!StringEncryptionPass.can_apply(&module));
    }
}
