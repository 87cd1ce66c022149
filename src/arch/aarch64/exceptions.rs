/*
 * ARM64 Exception Handlers
 *
 * Faults are fatal unless a proxy operation armed the guard. A guarded fault
 * is recorded and execution resumes, either at the next instruction (memory
 * accesses) or at the return path of the call trampoline (host calls).
 */

use core::arch::asm;
use core::fmt::{self, Write};
use core::sync::atomic::{compiler_fence, AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use super::uart::emergency_write;
use crate::error::FaultInfo;

extern "C" {
    static exception_vector_table: u8;
    static proxy_call_return: u8;
}

/// Exception frame saved by the assembly exception handlers
#[repr(C)]
pub struct ExceptionFrame {
    /// General purpose registers x0-x29
    pub x: [u64; 30],
    pub x30_lr: u64,
    pub sp_el0: u64,
    /// PC where the exception was taken
    pub elr_el1: u64,
    pub spsr_el1: u64,
}

/// What a guarded fault does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GuardMode {
    /// Faults are fatal
    Off = 0,
    /// Step over the faulting instruction
    Skip = 1,
    /// Unwind to the end of the call trampoline
    Return = 2,
}

static MODE: AtomicU8 = AtomicU8::new(GuardMode::Off as u8);
static FAULTS: AtomicU32 = AtomicU32::new(0);
static MAX_NESTED: AtomicU32 = AtomicU32::new(16);
static LAST_ESR: AtomicU64 = AtomicU64::new(0);
static LAST_FAR: AtomicU64 = AtomicU64::new(0);
static LAST_ELR: AtomicU64 = AtomicU64::new(0);

static INSTALLED: AtomicBool = AtomicBool::new(false);
static SAVED_VBAR: AtomicU64 = AtomicU64::new(0);

/// Install the monitor's vector table, remembering the previous one
pub fn install() {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    unsafe {
        let old: u64;
        asm!("mrs {0}, vbar_el1", out(reg) old);
        SAVED_VBAR.store(old, Ordering::SeqCst);

        let table = core::ptr::addr_of!(exception_vector_table) as u64;
        asm!("msr vbar_el1, {0}", "isb", in(reg) table);
    }
    log::debug!("exceptions: vectors at {:#x}", vector_base());
}

/// Restore the previous vector table and mask everything for the next stage
pub fn shutdown() {
    if !INSTALLED.swap(false, Ordering::SeqCst) {
        return;
    }
    unsafe {
        asm!("msr daifset, #0xf");
        asm!(
            "msr vbar_el1, {0}",
            "isb",
            in(reg) SAVED_VBAR.load(Ordering::SeqCst)
        );
    }
}

pub fn vector_base() -> u64 {
    let vbar: u64;
    unsafe {
        asm!("mrs {0}, vbar_el1", out(reg) vbar);
    }
    vbar
}

/// Faults tolerated inside one guarded operation before halting
pub fn set_max_nested(n: u32) {
    MAX_NESTED.store(n, Ordering::SeqCst);
}

fn last_fault() -> FaultInfo {
    FaultInfo {
        esr: LAST_ESR.load(Ordering::SeqCst),
        far: LAST_FAR.load(Ordering::SeqCst),
        elr: LAST_ELR.load(Ordering::SeqCst),
    }
}

/// Whether the running guarded operation has faulted yet
#[inline]
pub fn faulted() -> bool {
    compiler_fence(Ordering::SeqCst);
    FAULTS.load(Ordering::SeqCst) != 0
}

/// Run `f` with the guard armed in `mode`
///
/// Returns the first fault's syndrome if anything trapped.
pub fn guarded<T>(mode: GuardMode, f: impl FnOnce() -> T) -> Result<T, FaultInfo> {
    FAULTS.store(0, Ordering::SeqCst);
    MODE.store(mode as u8, Ordering::SeqCst);
    compiler_fence(Ordering::SeqCst);
    let out = f();
    compiler_fence(Ordering::SeqCst);
    MODE.store(GuardMode::Off as u8, Ordering::SeqCst);
    if FAULTS.load(Ordering::SeqCst) != 0 {
        return Err(last_fault());
    }
    Ok(out)
}

fn mode() -> GuardMode {
    match MODE.load(Ordering::SeqCst) {
        1 => GuardMode::Skip,
        2 => GuardMode::Return,
        _ => GuardMode::Off,
    }
}

fn read_syndrome() -> (u64, u64) {
    let (esr, far): (u64, u64);
    unsafe {
        asm!("mrs {0}, esr_el1", out(reg) esr);
        asm!("mrs {0}, far_el1", out(reg) far);
    }
    (esr, far)
}

/// Record a fault; false once the nesting limit is exceeded
fn record(esr: u64, far: u64, elr: u64) -> bool {
    let n = FAULTS.fetch_add(1, Ordering::SeqCst);
    if n == 0 {
        LAST_ESR.store(esr, Ordering::SeqCst);
        LAST_FAR.store(far, Ordering::SeqCst);
        LAST_ELR.store(elr, Ordering::SeqCst);
    }
    n < MAX_NESTED.load(Ordering::SeqCst)
}

/// Lock-free console writer for the fatal path
struct Emergency;

impl Write for Emergency {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        emergency_write(s);
        Ok(())
    }
}

fn fatal(what: &str, frame: &ExceptionFrame, esr: u64, far: u64) -> ! {
    let mut out = Emergency;
    let _ = writeln!(out, "\n*** {} ***", what);
    let _ = writeln!(
        out,
        "ESR: {:#018x} (EC {:#x})  FAR: {:#018x}",
        esr,
        (esr >> 26) & 0x3F,
        far
    );
    let _ = writeln!(
        out,
        "ELR: {:#018x}  SPSR: {:#010x}  LR: {:#018x}",
        frame.elr_el1, frame.spsr_el1, frame.x30_lr
    );
    for (i, pair) in frame.x.chunks(2).enumerate() {
        let _ = writeln!(
            out,
            "x{:<2}: {:#018x}  x{:<2}: {:#018x}",
            i * 2,
            pair[0],
            i * 2 + 1,
            pair[1]
        );
    }
    let _ = writeln!(out, "[EXCEPTION] System halted.");
    super::halt()
}

/// Handle synchronous exceptions
#[no_mangle]
extern "C" fn handle_sync_exception(frame: &mut ExceptionFrame) {
    let (esr, far) = read_syndrome();
    match mode() {
        GuardMode::Off => fatal("SYNCHRONOUS EXCEPTION", frame, esr, far),
        mode => {
            if !record(esr, far, frame.elr_el1) {
                fatal("TOO MANY NESTED FAULTS", frame, esr, far);
            }
            if mode == GuardMode::Skip {
                frame.elr_el1 += 4;
            } else {
                frame.elr_el1 = unsafe { core::ptr::addr_of!(proxy_call_return) as u64 };
                // Resume at EL1h whatever the callee left in PSTATE.M
                frame.spsr_el1 = (frame.spsr_el1 & !0xF) | 0x5;
            }
        }
    }
}

/// Handle IRQ interrupts
///
/// Nothing unmasks IRQs; one arriving is reported and ignored.
#[no_mangle]
extern "C" fn handle_irq(_frame: &mut ExceptionFrame) {
    emergency_write("[IRQ] unexpected interrupt\n");
}

/// Handle FIQ (Fast Interrupt Request)
#[no_mangle]
extern "C" fn handle_fiq(_frame: &mut ExceptionFrame) {
    emergency_write("[FIQ] unexpected interrupt\n");
}

/// Handle SError (System Error)
#[no_mangle]
extern "C" fn handle_serror(frame: &mut ExceptionFrame) {
    let (esr, far) = read_syndrome();
    if mode() == GuardMode::Off || !record(esr, far, frame.elr_el1) {
        fatal("SYSTEM ERROR (SError)", frame, esr, far);
    }
}
