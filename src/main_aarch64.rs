//! proxymon - ARM64 entry point
//!
//! `boot.S` drops to EL1, sets up the stack and lands in [`proxymon_main`]
//! with the device tree pointer the loader passed in `x0`.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod device {
    use core::fmt::Write;
    use core::panic::PanicInfo;

    use proxymon::arch::aarch64::board::{self, VirtPlatform, KERNEL_BASE};
    use proxymon::arch::aarch64::memory::HwMemory;
    use proxymon::arch::aarch64::uart::{self, ConsoleTransport};
    use proxymon::arch::aarch64::{self as arch, exceptions};
    use proxymon::config::{ProxyConfig, VERSION};
    use proxymon::payload::PayloadScanner;
    use proxymon::{allocator, logger, uart_println, BootError, Orchestrator};

    /// Kernel entry point called by boot.S
    #[no_mangle]
    pub extern "C" fn proxymon_main(dtb: u64) -> ! {
        let config = ProxyConfig::DEFAULT;

        uart::init();
        uart_println!("\n[BOOT] proxymon v{} Starting...", VERSION);
        uart_println!("[BOOT] Running in EL{}", arch::current_el());

        allocator::init_heap();
        uart_println!("[ OK ] Heap allocator initialized ({}KB)", allocator::heap_region().1 / 1024);
        let _ = logger::init(uart::write_bytes, config.log_level);
        exceptions::set_max_nested(config.max_nested_faults);

        // SAFETY: x0 from the loader is a device tree or zero
        let mut platform = unsafe { VirtPlatform::new(dtb) };
        if platform.dtb() == 0 {
            log::warn!("No device tree found");
        }
        let (pay_start, pay_end) = board::payload_window();
        uart_println!(
            "[BOOT] Payload window {:#x} ({} KB)",
            pay_start,
            (pay_end - pay_start) / 1024
        );

        let mut mem = HwMemory;
        let mut loader = PayloadScanner::new(pay_start, pay_end, KERNEL_BASE, platform.dtb());
        log::debug!("payload: {:#x} bytes appended", loader.payload_size(&mut mem));
        let policy = platform.policy(config.policy);
        let mut link = ConsoleTransport;

        let vector = match Orchestrator::new(&mut platform, &mut mem, &mut loader, policy, config)
            .run(&mut link)
        {
            Ok(vector) => vector,
            Err(BootError::NothingToDo(e)) => {
                log::error!("{}", e);
                panic!("Nothing to do!");
            }
            Err(e) => panic!("{}", e),
        };

        log::info!("Vectoring to next stage...");
        log::info!("{}", vector);
        let (entry, args) = vector.into_parts();
        // SAFETY: the host or the payload scanner vouched for the entry point,
        // and teardown already handed the hardware back
        unsafe { arch::jump(entry, args) };
        panic!("Next stage returned!");
    }

    /// Panic handler
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        let _ = writeln!(Console, "\n[PANIC] {}", info);
        uart::emergency_write("[PANIC] System halted.\n");
        arch::halt()
    }

    struct Console;

    /// Lock-free console, the panic may have interrupted a UART holder
    impl Write for Console {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            uart::emergency_write(s);
            Ok(())
        }
    }
}

/// Host builds have nothing to run
#[cfg(not(target_os = "none"))]
fn main() {}
