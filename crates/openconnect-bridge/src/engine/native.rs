//! libopenconnect binding.
//!
//! The engine keeps a raw pointer to a boxed [`Trampolines`] as its callback
//! privdata. Every `extern "C"` entry point below recovers it, converts the C
//! arguments and catches panics, since unwinding into C is undefined.

#![allow(non_camel_case_types)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{CsdOptions, Engine, EngineError, EngineFactory, EngineId, LoopLimits, Protocol};
use crate::command::{CommandPipe, CommandSink, EngineCommand};
use crate::error::CommandError;
use crate::form::{AuthForm, FormChoice, FormError, FormOption, FormOptionType, FormResult};
use crate::ip_info::IpInfo;
use crate::progress::LogLevel;
use crate::trampoline::Trampolines;

const EINVAL: c_int = 22;
const OC_FORM_OPT_IGNORE: c_uint = 0x0001;

#[repr(C)]
pub struct openconnect_info {
    _private: [u8; 0],
}

#[repr(C)]
struct oc_form_opt {
    next: *mut oc_form_opt,
    kind: c_int,
    name: *mut c_char,
    label: *mut c_char,
    value: *mut c_char,
    flags: c_uint,
    reserved: *mut c_void,
}

#[repr(C)]
struct oc_choice {
    name: *mut c_char,
    label: *mut c_char,
    auth_type: *mut c_char,
    override_name: *mut c_char,
    override_label: *mut c_char,
}

#[repr(C)]
struct oc_form_opt_select {
    form: oc_form_opt,
    nr_choices: c_int,
    choices: *mut *mut oc_choice,
}

#[repr(C)]
struct oc_auth_form {
    banner: *mut c_char,
    message: *mut c_char,
    error: *mut c_char,
    auth_id: *mut c_char,
    method: *mut c_char,
    action: *mut c_char,
    opts: *mut oc_form_opt,
    authgroup_opt: *mut oc_form_opt_select,
    authgroup_selection: c_int,
}

#[repr(C)]
struct oc_split_include {
    route: *const c_char,
    next: *mut oc_split_include,
}

#[repr(C)]
struct oc_ip_info {
    addr: *const c_char,
    netmask: *const c_char,
    addr6: *const c_char,
    netmask6: *const c_char,
    dns: [*const c_char; 3],
    nbns: [*const c_char; 3],
    domain: *const c_char,
    proxy_pac: *const c_char,
    mtu: c_int,
    split_dns: *mut oc_split_include,
    split_includes: *mut oc_split_include,
    split_excludes: *mut oc_split_include,
    gateway_addr: *mut c_char,
}

#[repr(C)]
struct oc_vpn_option {
    option: *mut c_char,
    value: *mut c_char,
    next: *mut oc_vpn_option,
}

type validate_peer_cert_fn = unsafe extern "C" fn(*mut c_void, *const c_char) -> c_int;
type write_new_config_fn = unsafe extern "C" fn(*mut c_void, *const c_char, c_int) -> c_int;
type process_auth_form_fn = unsafe extern "C" fn(*mut c_void, *mut oc_auth_form) -> c_int;
type progress_fn = unsafe extern "C" fn(*mut c_void, c_int, *const c_char, ...);
type open_webview_fn =
    unsafe extern "C" fn(*mut openconnect_info, *const c_char, *mut c_void) -> c_int;
type reconnected_fn = unsafe extern "C" fn(*mut c_void);

extern "C" {
    fn openconnect_vpninfo_new(
        useragent: *const c_char,
        validate_peer_cert: Option<validate_peer_cert_fn>,
        write_new_config: Option<write_new_config_fn>,
        process_auth_form: Option<process_auth_form_fn>,
        progress: Option<progress_fn>,
        privdata: *mut c_void,
    ) -> *mut openconnect_info;
    fn openconnect_set_external_browser_callback(
        vpninfo: *mut openconnect_info,
        callback: Option<open_webview_fn>,
    );
    fn openconnect_set_reconnected_handler(
        vpninfo: *mut openconnect_info,
        handler: Option<reconnected_fn>,
    );
    fn openconnect_set_option_value(opt: *mut oc_form_opt, value: *const c_char) -> c_int;
    fn openconnect_set_loglevel(vpninfo: *mut openconnect_info, level: c_int);
    fn openconnect_set_protocol(vpninfo: *mut openconnect_info, protocol: *const c_char) -> c_int;
    fn openconnect_parse_url(vpninfo: *mut openconnect_info, url: *const c_char) -> c_int;
    fn openconnect_set_dpd(vpninfo: *mut openconnect_info, min_seconds: c_int);
    fn openconnect_set_allow_insecure_crypto(vpninfo: *mut openconnect_info, val: c_uint) -> c_int;
    fn openconnect_obtain_cookie(vpninfo: *mut openconnect_info) -> c_int;
    fn openconnect_make_cstp_connection(vpninfo: *mut openconnect_info) -> c_int;
    fn openconnect_setup_tun_script(vpninfo: *mut openconnect_info, script: *const c_char) -> c_int;
    fn openconnect_setup_csd(
        vpninfo: *mut openconnect_info,
        uid: c_uint,
        silent: c_int,
        wrapper: *const c_char,
    ) -> c_int;
    fn openconnect_setup_cmd_pipe(vpninfo: *mut openconnect_info) -> c_int;
    fn openconnect_get_ip_info(
        vpninfo: *mut openconnect_info,
        info: *mut *const oc_ip_info,
        cstp_options: *mut *const oc_vpn_option,
        dtls_options: *mut *const oc_vpn_option,
    ) -> c_int;
    fn openconnect_mainloop(
        vpninfo: *mut openconnect_info,
        reconnect_timeout: c_int,
        reconnect_interval: c_int,
    ) -> c_int;
    fn openconnect_vpninfo_free(vpninfo: *mut openconnect_info);

    // bridge/progress.c
    fn ocb_progress_vargs(privdata: *mut c_void, level: c_int, fmt: *const c_char, ...);
}

unsafe fn trampolines<'a>(privdata: *mut c_void) -> Option<&'a Trampolines> {
    (privdata as *const Trampolines).as_ref()
}

unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

fn guarded<T>(fallback: T, f: impl FnOnce() -> Option<T>) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Some(value)) => value,
        Ok(None) => fallback,
        Err(_) => {
            tracing::error!("callback panicked across the native boundary");
            fallback
        }
    }
}

unsafe extern "C" fn validate_peer_cert(privdata: *mut c_void, reason: *const c_char) -> c_int {
    guarded(1, || {
        let tramp = trampolines(privdata)?;
        let reason = c_string(reason).unwrap_or_default();
        Some(tramp.validate_peer_cert(&reason))
    })
}

unsafe extern "C" fn process_auth_form(privdata: *mut c_void, form: *mut oc_auth_form) -> c_int {
    guarded(FormResult::Err.as_raw(), || {
        let tramp = trampolines(privdata)?;
        let raw = form.as_mut()?;
        let (mut form, slots) = read_form(raw);

        let code = tramp.process_auth_form(&mut form);
        match FormResult::from_raw(code) {
            FormResult::Ok | FormResult::NewGroup => match apply_responses(&form, &slots) {
                Ok(()) => Some(code),
                Err(err) => {
                    tracing::warn!(error = %err, "auth form write-back failed");
                    Some(FormResult::Err.as_raw())
                }
            },
            _ => Some(code),
        }
    })
}

/// Delivery half of the progress shim: `message` is already formatted and
/// NUL-terminated, and is freed by the shim when this returns.
#[no_mangle]
pub unsafe extern "C" fn ocb_progress_message(privdata: *mut c_void, level: c_int, message: *const c_char) {
    guarded((), || {
        let tramp = trampolines(privdata)?;
        if message.is_null() {
            return None;
        }
        let message = CStr::from_ptr(message).to_string_lossy();
        tramp.progress_message(level, &message);
        Some(())
    })
}

unsafe extern "C" fn open_external_browser(
    _vpninfo: *mut openconnect_info,
    uri: *const c_char,
    privdata: *mut c_void,
) -> c_int {
    guarded(1, || {
        let tramp = trampolines(privdata)?;
        let uri = c_string(uri)?;
        Some(tramp.open_external_browser(&uri))
    })
}

unsafe extern "C" fn reconnected(privdata: *mut c_void) {
    guarded((), || {
        trampolines(privdata)?.reconnected();
        Some(())
    })
}

/// Native option each [`FormOption`] answers to: the auth group first (if
/// any), then the non-ignored options in order.
struct FormSlots {
    auth_group: Option<*mut oc_form_opt>,
    options: Vec<*mut oc_form_opt>,
}

unsafe fn read_option(opt: *mut oc_form_opt) -> FormOption {
    let raw = &*opt;
    let kind = FormOptionType::from_raw(raw.kind);
    let mut option = FormOption::new(
        c_string(raw.name).unwrap_or_default(),
        c_string(raw.label).unwrap_or_default(),
        kind,
    );
    if kind == FormOptionType::Select {
        let select = &*(opt as *const oc_form_opt_select);
        let count = usize::try_from(select.nr_choices).unwrap_or(0);
        if !select.choices.is_null() {
            option.choices = std::slice::from_raw_parts(select.choices, count)
                .iter()
                .filter_map(|choice| choice.as_ref())
                .map(|choice| {
                    FormChoice::new(
                        c_string(choice.name).unwrap_or_default(),
                        c_string(choice.label).unwrap_or_default(),
                    )
                })
                .collect();
        }
    }
    option
}

unsafe fn read_form(raw: &oc_auth_form) -> (AuthForm, FormSlots) {
    let mut form = AuthForm {
        banner: c_string(raw.banner),
        message: c_string(raw.message),
        error: c_string(raw.error),
        ..AuthForm::default()
    };
    let mut slots = FormSlots {
        auth_group: None,
        options: Vec::new(),
    };

    if !raw.authgroup_opt.is_null() {
        let group = raw.authgroup_opt as *mut oc_form_opt;
        form.auth_group = Some(read_option(group));
        slots.auth_group = Some(group);
    }

    let mut cursor = raw.opts;
    while let Some(opt) = cursor.as_ref() {
        if opt.flags & OC_FORM_OPT_IGNORE == 0 {
            form.options.push(read_option(cursor));
            slots.options.push(cursor);
        }
        cursor = opt.next;
    }
    (form, slots)
}

type Response<'a> = (&'a FormOption, *mut oc_form_opt, CString);

/// Pairs every answered value with its native option. Nothing is written if a
/// value cannot be passed to C.
fn encode_responses<'a>(
    form: &'a AuthForm,
    slots: &FormSlots,
) -> Result<Vec<Response<'a>>, FormError> {
    let group = form.auth_group.as_ref().zip(slots.auth_group);
    group
        .into_iter()
        .chain(form.options.iter().zip(slots.options.iter().copied()))
        .filter_map(|(option, slot)| option.value().map(|value| (option, slot, value)))
        .map(|(option, slot, value)| match CString::new(value) {
            Ok(value) => Ok((option, slot, value)),
            Err(_) => Err(FormError::Rejected {
                option: option.name.clone(),
            }),
        })
        .collect()
}

/// Copies every answered value back into the engine's form.
unsafe fn apply_responses(form: &AuthForm, slots: &FormSlots) -> Result<(), FormError> {
    for (option, slot, value) in encode_responses(form, slots)? {
        if openconnect_set_option_value(slot, value.as_ptr()) != 0 {
            return Err(FormError::Rejected {
                option: option.name.clone(),
            });
        }
    }
    Ok(())
}

unsafe fn read_routes(mut cursor: *const oc_split_include) -> Vec<String> {
    let mut routes = Vec::new();
    while let Some(entry) = cursor.as_ref() {
        routes.extend(c_string(entry.route));
        cursor = entry.next;
    }
    routes
}

unsafe fn read_vpn_options(mut cursor: *const oc_vpn_option) -> Vec<(String, String)> {
    let mut options = Vec::new();
    while let Some(entry) = cursor.as_ref() {
        if let Some(name) = c_string(entry.option) {
            options.push((name, c_string(entry.value).unwrap_or_default()));
        }
        cursor = entry.next;
    }
    options
}

unsafe fn read_ip_info(
    raw: &oc_ip_info,
    cstp: *const oc_vpn_option,
    dtls: *const oc_vpn_option,
) -> IpInfo {
    IpInfo {
        addr: c_string(raw.addr),
        netmask: c_string(raw.netmask),
        addr6: c_string(raw.addr6),
        netmask6: c_string(raw.netmask6),
        dns: raw.dns.iter().filter_map(|ptr| c_string(*ptr)).collect(),
        nbns: raw.nbns.iter().filter_map(|ptr| c_string(*ptr)).collect(),
        domain: c_string(raw.domain),
        proxy_pac: c_string(raw.proxy_pac),
        mtu: raw.mtu,
        split_dns: read_routes(raw.split_dns),
        split_includes: read_routes(raw.split_includes),
        split_excludes: read_routes(raw.split_excludes),
        gateway: c_string(raw.gateway_addr),
        cstp_options: read_vpn_options(cstp),
        dtls_options: read_vpn_options(dtls),
    }
}

/// Write end of the engine's command pipe. The descriptor belongs to the
/// engine and is cleared under the lock before the engine closes it.
struct PipeSink {
    fd: Arc<Mutex<Option<c_int>>>,
}

impl CommandSink for PipeSink {
    #[cfg(unix)]
    fn send(&self, command: EngineCommand) -> Result<(), CommandError> {
        use std::fs::File;
        use std::io::Write;
        use std::mem::ManuallyDrop;
        use std::os::unix::io::FromRawFd;

        let fd = self.fd.lock();
        let raw = (*fd).ok_or(CommandError::Closed)?;
        // SAFETY: `raw` stays open while the lock is held; ManuallyDrop keeps
        // the File from closing it.
        let mut pipe = ManuallyDrop::new(unsafe { File::from_raw_fd(raw) });
        pipe.write_all(&[command.as_byte()])?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn send(&self, _command: EngineCommand) -> Result<(), CommandError> {
        if self.fd.lock().is_none() {
            return Err(CommandError::Closed);
        }
        Err(CommandError::Io(std::io::ErrorKind::Unsupported.into()))
    }
}

/// Allocates engines backed by libopenconnect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFactory;

impl EngineFactory for NativeFactory {
    type Engine = NativeEngine;

    fn create(&self, user_agent: &str, trampolines: Trampolines) -> Option<NativeEngine> {
        let user_agent = CString::new(user_agent).ok()?;
        let privdata = Box::into_raw(Box::new(trampolines));

        let vpninfo = unsafe {
            openconnect_vpninfo_new(
                user_agent.as_ptr(),
                Some(validate_peer_cert),
                None,
                Some(process_auth_form),
                Some(ocb_progress_vargs),
                privdata as *mut c_void,
            )
        };
        let Some(vpninfo) = NonNull::new(vpninfo) else {
            // SAFETY: the engine was never created, so nothing else holds privdata.
            drop(unsafe { Box::from_raw(privdata) });
            tracing::warn!("openconnect_vpninfo_new returned NULL");
            return None;
        };

        unsafe {
            openconnect_set_external_browser_callback(vpninfo.as_ptr(), Some(open_external_browser));
            openconnect_set_reconnected_handler(vpninfo.as_ptr(), Some(reconnected));
        }

        Some(NativeEngine {
            vpninfo,
            privdata,
            tun_script: None,
            csd_wrapper: None,
            command_fd: Arc::default(),
        })
    }
}

pub struct NativeEngine {
    vpninfo: NonNull<openconnect_info>,
    privdata: *mut Trampolines,
    tun_script: Option<CString>,
    csd_wrapper: Option<CString>,
    command_fd: Arc<Mutex<Option<c_int>>>,
}

// The engine is used from one thread at a time: the caller's while
// configuring, then the loop thread only.
unsafe impl Send for NativeEngine {}

impl NativeEngine {
    fn ptr(&self) -> *mut openconnect_info {
        self.vpninfo.as_ptr()
    }

    fn report_ip_info(&self) {
        let mut info = ptr::null();
        let mut cstp = ptr::null();
        let mut dtls = ptr::null();
        let rc = unsafe { openconnect_get_ip_info(self.ptr(), &mut info, &mut cstp, &mut dtls) };
        let info = match unsafe { info.as_ref() } {
            Some(info) if rc == 0 => unsafe { read_ip_info(info, cstp, dtls) },
            _ => {
                tracing::warn!(rc, "tunnel addressing unavailable");
                return;
            }
        };
        if let Some(tramp) = unsafe { self.privdata.as_ref() } {
            tramp.connected(&info);
        }
    }
}

fn c_arg(context: &'static str, value: &str) -> Result<CString, EngineError> {
    CString::new(value).map_err(|_| EngineError::new(context, -EINVAL))
}

impl Engine for NativeEngine {
    fn id(&self) -> EngineId {
        EngineId::from_raw(self.vpninfo.as_ptr() as usize as u64)
    }

    fn set_log_level(&mut self, level: LogLevel) {
        unsafe { openconnect_set_loglevel(self.ptr(), level.as_raw()) }
    }

    fn set_protocol(&mut self, protocol: Protocol) -> Result<(), EngineError> {
        let name = c_arg("set protocol", protocol.as_str())?;
        EngineError::check("set protocol", unsafe {
            openconnect_set_protocol(self.ptr(), name.as_ptr())
        })
    }

    fn parse_url(&mut self, url: &str) -> Result<(), EngineError> {
        let url = c_arg("parse URL", url)?;
        EngineError::check("parse URL", unsafe { openconnect_parse_url(self.ptr(), url.as_ptr()) })
    }

    fn set_dpd(&mut self, min_seconds: u32) {
        let seconds = c_int::try_from(min_seconds).unwrap_or(c_int::MAX);
        unsafe { openconnect_set_dpd(self.ptr(), seconds) }
    }

    fn set_allow_insecure_crypto(&mut self, allowed: bool) -> Result<(), EngineError> {
        EngineError::check("set allow-insecure-crypto", unsafe {
            openconnect_set_allow_insecure_crypto(self.ptr(), c_uint::from(allowed))
        })
    }

    /// Stored and applied once the tunnel is up, after the CSTP connection.
    fn set_tun_script(&mut self, script: &str) -> Result<(), EngineError> {
        self.tun_script = Some(c_arg("setup tun script", script)?);
        Ok(())
    }

    fn setup_csd(&mut self, csd: &CsdOptions) -> Result<(), EngineError> {
        let wrapper = c_arg("setup CSD", &csd.wrapper)?;
        EngineError::check("setup CSD", unsafe {
            openconnect_setup_csd(self.ptr(), csd.uid, c_int::from(csd.silent), wrapper.as_ptr())
        })?;
        self.csd_wrapper = Some(wrapper);
        Ok(())
    }

    fn command_pipe(&mut self) -> Result<CommandPipe, EngineError> {
        let mut fd = self.command_fd.lock();
        if fd.is_none() {
            let raw = unsafe { openconnect_setup_cmd_pipe(self.ptr()) };
            if raw < 0 {
                return Err(EngineError::new("setup command pipe", raw));
            }
            *fd = Some(raw);
        }
        drop(fd);

        Ok(CommandPipe::new(Arc::new(PipeSink {
            fd: Arc::clone(&self.command_fd),
        })))
    }

    fn main_loop(&mut self, limits: LoopLimits) -> i32 {
        let vpninfo = self.ptr();

        let rc = unsafe { openconnect_obtain_cookie(vpninfo) };
        if rc != 0 {
            tracing::warn!(rc, "failed to obtain cookie");
            return rc;
        }
        let rc = unsafe { openconnect_make_cstp_connection(vpninfo) };
        if rc != 0 {
            tracing::warn!(rc, "failed to make CSTP connection");
            return rc;
        }
        if let Some(script) = &self.tun_script {
            let rc = unsafe { openconnect_setup_tun_script(vpninfo, script.as_ptr()) };
            if rc != 0 {
                tracing::warn!(rc, "failed to set up tun script");
                return rc;
            }
        }
        self.report_ip_info();

        unsafe {
            openconnect_mainloop(vpninfo, limits.reconnect_timeout, limits.reconnect_interval)
        }
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        self.command_fd.lock().take();
        unsafe {
            openconnect_vpninfo_free(self.vpninfo.as_ptr());
            if !self.privdata.is_null() {
                drop(Box::from_raw(self.privdata));
                self.privdata = ptr::null_mut();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn read_form_skips_ignored_options_and_reads_choices() {
        let (corp, corp_label) = (owned("corp"), owned("Corporate"));
        let mut choice = oc_choice {
            name: corp.as_ptr() as *mut c_char,
            label: corp_label.as_ptr() as *mut c_char,
            auth_type: ptr::null_mut(),
            override_name: ptr::null_mut(),
            override_label: ptr::null_mut(),
        };
        let mut choices = [&mut choice as *mut oc_choice];

        let (pw_name, pw_label) = (owned("password"), owned("Password:"));
        let mut password = oc_form_opt {
            next: ptr::null_mut(),
            kind: FormOptionType::Password.as_raw(),
            name: pw_name.as_ptr() as *mut c_char,
            label: pw_label.as_ptr() as *mut c_char,
            value: ptr::null_mut(),
            flags: 0,
            reserved: ptr::null_mut(),
        };
        let (hidden_name, empty) = (owned("csrf"), owned(""));
        let mut hidden = oc_form_opt {
            next: &mut password,
            kind: FormOptionType::Hidden.as_raw(),
            name: hidden_name.as_ptr() as *mut c_char,
            label: empty.as_ptr() as *mut c_char,
            value: ptr::null_mut(),
            flags: OC_FORM_OPT_IGNORE,
            reserved: ptr::null_mut(),
        };
        let (group_name, group_label) = (owned("group_list"), owned("GROUP:"));
        let mut group = oc_form_opt_select {
            form: oc_form_opt {
                next: ptr::null_mut(),
                kind: FormOptionType::Select.as_raw(),
                name: group_name.as_ptr() as *mut c_char,
                label: group_label.as_ptr() as *mut c_char,
                value: ptr::null_mut(),
                flags: 0,
                reserved: ptr::null_mut(),
            },
            nr_choices: 1,
            choices: choices.as_mut_ptr(),
        };
        let message = owned("Please enter your password");
        let raw = oc_auth_form {
            banner: ptr::null_mut(),
            message: message.as_ptr() as *mut c_char,
            error: ptr::null_mut(),
            auth_id: ptr::null_mut(),
            method: ptr::null_mut(),
            action: ptr::null_mut(),
            opts: &mut hidden,
            authgroup_opt: &mut group,
            authgroup_selection: 0,
        };

        let (form, slots) = unsafe { read_form(&raw) };

        assert_eq!(form.message.as_deref(), Some("Please enter your password"));
        assert_eq!(form.banner, None);
        assert_eq!(form.options.len(), 1);
        assert_eq!(form.options[0].name, "password");
        assert_eq!(form.options[0].kind, FormOptionType::Password);
        let group_opt = form.auth_group.as_ref().unwrap();
        assert_eq!(group_opt.choices, vec![FormChoice::new("corp", "Corporate")]);
        assert_eq!(slots.options, vec![&mut password as *mut oc_form_opt]);
        assert!(slots.auth_group.is_some());
    }

    #[test]
    fn values_with_nul_are_rejected_before_write_back() {
        let mut user = FormOption::text("username", "User:");
        user.set_value("alice").unwrap();
        let mut password = FormOption::new("password", "Password:", FormOptionType::Password);
        password.set_value("pa\0ss").unwrap();
        let form = AuthForm::new().with_option(user.clone());
        let slots = FormSlots {
            auth_group: None,
            options: vec![ptr::null_mut()],
        };

        let encoded = encode_responses(&form, &slots).unwrap();
        assert_eq!(encoded.len(), 1);
        assert_eq!(encoded[0].2.as_bytes(), b"alice");

        let form = AuthForm::new().with_option(user).with_option(password);
        let slots = FormSlots {
            auth_group: None,
            options: vec![ptr::null_mut(), ptr::null_mut()],
        };
        assert_eq!(
            encode_responses(&form, &slots).unwrap_err(),
            FormError::Rejected {
                option: "password".into()
            }
        );
    }

    #[test]
    fn read_ip_info_walks_routes_and_options() {
        let (addr, mask, dns) = (owned("10.8.0.12"), owned("255.255.255.0"), owned("10.0.0.53"));
        let (route_a, route_b) = (owned("10.0.0.0/8"), owned("192.168.0.0/16"));
        let mut second = oc_split_include {
            route: route_b.as_ptr(),
            next: ptr::null_mut(),
        };
        let mut first = oc_split_include {
            route: route_a.as_ptr(),
            next: &mut second,
        };
        let (key, value) = (owned("X-CSTP-Keepalive"), owned("20"));
        let keepalive = oc_vpn_option {
            option: key.as_ptr() as *mut c_char,
            value: value.as_ptr() as *mut c_char,
            next: ptr::null_mut(),
        };
        let raw = oc_ip_info {
            addr: addr.as_ptr(),
            netmask: mask.as_ptr(),
            addr6: ptr::null(),
            netmask6: ptr::null(),
            dns: [dns.as_ptr(), ptr::null(), ptr::null()],
            nbns: [ptr::null(); 3],
            domain: ptr::null(),
            proxy_pac: ptr::null(),
            mtu: 1399,
            split_dns: ptr::null_mut(),
            split_includes: &mut first,
            split_excludes: ptr::null_mut(),
            gateway_addr: ptr::null_mut(),
        };

        let info = unsafe { read_ip_info(&raw, &keepalive, ptr::null()) };

        assert_eq!(info.addr.as_deref(), Some("10.8.0.12"));
        assert_eq!(info.addr6, None);
        assert_eq!(info.dns, vec!["10.0.0.53".to_string()]);
        assert!(info.nbns.is_empty());
        assert_eq!(info.split_includes, vec!["10.0.0.0/8", "192.168.0.0/16"]);
        assert_eq!(info.mtu, 1399);
        assert_eq!(info.cstp_option("X-CSTP-Keepalive"), Some("20"));
        assert!(info.dtls_options.is_empty());
    }

    #[test]
    fn pipe_sink_reports_closed_after_release() {
        let sink = PipeSink {
            fd: Arc::new(Mutex::new(None)),
        };
        assert!(matches!(sink.send(EngineCommand::Cancel), Err(CommandError::Closed)));
    }
}
