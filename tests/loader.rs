//! Loader behavior on whole images: symbol publication, register setup,
//! determinism, and rejection of malformed or unsupported files.

mod common;

use amx_vm::{Cell, Host, LoadError, Loader, Neumann, Opcode, PagedBuffers, RunError, VmContext};
use common::ImageBuilder;

type Mem<C> = Neumann<PagedBuffers<C, 5>>;

struct NullHost;

impl<C: Cell> Host<C, Mem<C>> for NullHost {
    type Native = usize;

    fn resolve_native(&mut self, name: &str) -> Option<usize> {
        (name == "known").then_some(0)
    }

    fn native(
        &mut self,
        _ctx: &mut VmContext<'_, C, Mem<C>, Self>,
        _native: usize,
        _argc: C,
        _args: C,
    ) -> Result<C, RunError> {
        Ok(C::ZERO)
    }
}

fn sample_image(cb: usize) -> Vec<u8> {
    let cbi = cb as i64;
    let mut b = ImageBuilder::new(cb);
    b.native("known");

    b.main_here();
    b.op(Opcode::Proc);
    b.op1(Opcode::ConstPri, 11);
    b.op(Opcode::Retn);

    b.public("answer");
    b.op(Opcode::Proc);
    b.op1(Opcode::LoadPri, 0); // first static cell
    b.op1(Opcode::LoadSAlt, 3 * cbi);
    b.op(Opcode::Add);
    b.op(Opcode::Retn);

    let counter = b.data_cell(40);
    b.pubvar("counter", counter);
    b.build()
}

fn check_load_and_symbols<C: Cell>() {
    let image = sample_image(C::BYTES);
    let mut host = NullHost;
    let mut program: Loader<C, Mem<C>, NullHost> =
        Loader::load(&image, &mut host, Mem::<C>::default()).unwrap();

    let main = program.get_main().expect("main");
    assert_eq!(program.call(&mut host, main, &[]).unwrap(), C::from_i64(11));

    let answer = program.get_public("answer").expect("answer");
    assert_eq!(
        program.call(&mut host, answer, &[C::from_i64(2)]).unwrap(),
        C::from_i64(42)
    );
    assert_eq!(program.get_public("absent"), None);

    // The pubvar address points at the initialized static cell.
    let counter = program.get_pubvar("counter").expect("counter");
    let absolute = program.amx.dat().wrapping_add(counter);
    assert_eq!(program.amx.data_read(absolute).unwrap(), C::from_i64(40));
    assert_eq!(program.get_pubvar("absent"), None);

    // Register file init: empty stack, heap right after static data.
    assert_eq!(program.amx.stk(), program.amx.stp());
    assert_eq!(program.amx.hea().to_u64(), C::BYTES as u64);
}

#[test]
fn load_and_symbols_w16() {
    check_load_and_symbols::<u16>();
}

#[test]
fn load_and_symbols_w32() {
    check_load_and_symbols::<u32>();
}

#[test]
fn load_and_symbols_w64() {
    check_load_and_symbols::<u64>();
}

#[test]
fn loading_is_deterministic() {
    let image = sample_image(4);
    let mut h1 = NullHost;
    let mut h2 = NullHost;
    let a: Loader<u32, Mem<u32>, NullHost> =
        Loader::load(&image, &mut h1, Mem::default()).unwrap();
    let b: Loader<u32, Mem<u32>, NullHost> =
        Loader::load(&image, &mut h2, Mem::default()).unwrap();

    assert_eq!(a.get_main(), b.get_main());
    assert_eq!(a.get_public("answer"), b.get_public("answer"));
    assert_eq!(a.get_pubvar("counter"), b.get_pubvar("counter"));
    assert_eq!(a.amx.cod(), b.amx.cod());
    assert_eq!(a.amx.dat(), b.amx.dat());
    assert_eq!(a.amx.stk(), b.amx.stk());
    assert_eq!(a.amx.stp(), b.amx.stp());
    assert_eq!(a.amx.hea(), b.amx.hea());

    // The whole data image, heap and stack reservation included, agrees.
    let mut va = a.amx.dat();
    loop {
        let (x, y) = (a.amx.data_read(va), b.amx.data_read(va));
        assert_eq!(x, y);
        if x.is_err() {
            break;
        }
        va = va.wrapping_add(4);
    }
}

#[test]
fn missing_natives_fail_the_load() {
    let mut b = ImageBuilder::new(4);
    b.native("unheard_of");
    b.public("f");
    b.op(Opcode::Proc);
    b.op(Opcode::Retn);
    let image = b.build();

    let mut host = NullHost;
    let result: Result<Loader<u32, Mem<u32>, NullHost>, _> =
        Loader::load(&image, &mut host, Mem::default());
    assert_eq!(result.err(), Some(LoadError::NativeNotResolved));
}

#[test]
fn wrong_width_image_is_rejected() {
    let image = sample_image(8);
    let mut host = NullHost;
    let result: Result<Loader<u32, Mem<u32>, NullHost>, _> =
        Loader::load(&image, &mut host, Mem::default());
    assert_eq!(result.err(), Some(LoadError::WrongCellSize));
}

#[test]
fn truncated_image_is_rejected() {
    let image = sample_image(4);
    let mut host = NullHost;
    for cut in [4usize, 59, image.len() - 3] {
        let result: Result<Loader<u32, Mem<u32>, NullHost>, _> =
            Loader::load(&image[..cut], &mut host, Mem::default());
        assert_eq!(result.err(), Some(LoadError::InvalidFile), "cut at {cut}");
    }
}

#[test]
fn loaded_libraries_are_out_of_scope() {
    let mut b = ImageBuilder::new(4);
    b.public("f");
    b.op(Opcode::Proc);
    b.op(Opcode::Retn);
    let mut image = b.build();

    // Pretend a library section sits between `libraries` and `pubvars` by
    // pushing the pubvars offset (header bytes 44..48) past it.
    let pubvars = u32::from_le_bytes(image[44..48].try_into().unwrap());
    image[44..48].copy_from_slice(&(pubvars + 8).to_le_bytes());

    let mut host = NullHost;
    let result: Result<Loader<u32, Mem<u32>, NullHost>, _> =
        Loader::load(&image, &mut host, Mem::default());
    assert_eq!(result.err(), Some(LoadError::FeatureNotSupported));
}

#[test]
fn a_program_without_main_reports_none() {
    let mut b = ImageBuilder::new(4);
    b.public("f");
    b.op(Opcode::Proc);
    b.op1(Opcode::ConstPri, 1);
    b.op(Opcode::Retn);
    let image = b.build();

    let mut host = NullHost;
    let program: Loader<u32, Mem<u32>, NullHost> =
        Loader::load(&image, &mut host, Mem::default()).unwrap();
    assert_eq!(program.get_main(), None);
    assert!(program.get_public("f").is_some());
}
