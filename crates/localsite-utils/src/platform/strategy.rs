use crate::command::{CommandSpec, CommandStep};
use crate::identity::Identity;
use crate::php;
use localsite_core::platform::{InitSystem, Os, PackageManagerKind, PlatformProfile};
use localsite_core::{ConfigDescriptor, Sysroot, WebServer};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DIR_ACL: &str = "u::rwx,g::rwx,o::rx";
const FILE_ACL: &str = "u::rw,g::rw,o::r";

/// One step of a site activation or deactivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationStep {
    Run(CommandStep),
    /// Symlink `link` to `target`; skipped when `link` already exists.
    Link { target: PathBuf, link: PathBuf },
    /// Remove the symlink at `link` if present.
    Unlink { link: PathBuf },
    /// Delete a generated file if present.
    Remove { path: PathBuf },
    /// Make sure `file` contains `line`, uncommenting `replaces` when found.
    /// A new line goes right after the first line equal to `after` when set,
    /// at the end of the file otherwise.
    EnsureLine {
        file: PathBuf,
        line: String,
        replaces: Option<String>,
        after: Option<String>,
    },
}

impl ActivationStep {
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Run(step) => step.description.clone(),
            Self::Link { link, .. } => format!("enable site link {}", link.display()),
            Self::Unlink { link } => format!("remove site link {}", link.display()),
            Self::Remove { path } => format!("remove {}", path.display()),
            Self::EnsureLine { file, line, .. } => {
                format!("add \"{line}\" to {}", file.display())
            }
        }
    }
}

/// Everything that differs between operating systems, beyond config paths.
pub trait PlatformStrategy {
    /// Group that must be able to read (and write, for caches) the document
    /// root.
    fn web_group(&self, profile: &PlatformProfile, server: WebServer) -> String;

    /// Ownership/ACL commands for `path`, in execution order.
    fn permission_steps(&self, path: &Path, owner: &Identity, group: &str) -> Vec<CommandStep>;

    fn activation_plan(
        &self,
        profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        domain: &str,
        ssl: bool,
    ) -> Vec<ActivationStep>;

    fn deactivation_plan(
        &self,
        profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        domain: &str,
    ) -> Vec<ActivationStep>;

    fn hosts_path(&self) -> PathBuf;

    /// Parent directory of the per-domain certificate directories.
    fn cert_root(&self, profile: &PlatformProfile) -> PathBuf;

    /// Commands that install mkcert when it is missing.
    fn mkcert_install_steps(&self, profile: &PlatformProfile, user: &Identity) -> Vec<CommandStep>;

    /// `fastcgi_pass` target for PHP-FPM.
    fn php_fpm_endpoint(&self, sysroot: &Sysroot) -> String;
}

/// Pick the strategy for the detected OS.
#[must_use]
pub fn strategy_for(profile: &PlatformProfile) -> Box<dyn PlatformStrategy> {
    match profile.os {
        Os::Linux => Box::new(LinuxStrategy),
        Os::Darwin => Box::new(DarwinStrategy),
        Os::Windows => Box::new(WindowsStrategy),
    }
}

fn run(description: impl Into<String>, program: &str, args: &[&str]) -> CommandStep {
    CommandStep::new(description, CommandSpec::new(program).args(args.iter().copied()))
}

fn find_exec(description: &str, root: &Path, kind: &str, exec: &[&str]) -> CommandStep {
    let command = CommandSpec::new("find")
        .path_arg(root)
        .args(["-type", kind, "-exec"])
        .args(exec.iter().copied())
        .args(["{}", "+"]);
    CommandStep::new(description, command)
}

/// Directories under the document root that the server must write to.
fn writable_dirs(path: &Path) -> Vec<PathBuf> {
    ["storage", "bootstrap/cache"]
        .iter()
        .map(|dir| path.join(dir))
        .filter(|dir| dir.is_dir())
        .collect()
}

fn sqlite_files(storage: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(storage)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().contains(".sqlite"))
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn reload_step(profile: &PlatformProfile, unit: &str) -> ActivationStep {
    let step = if profile.init_system == InitSystem::Systemd {
        run(format!("reload {unit}"), "systemctl", &["reload", unit])
    } else {
        run(format!("reload {unit}"), "service", &[unit, "reload"])
    };
    ActivationStep::Run(step)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxStrategy;

impl LinuxStrategy {
    fn nginx_link(descriptor: &ConfigDescriptor, domain: &str) -> PathBuf {
        descriptor.server_root.join("sites-enabled").join(domain)
    }
}

impl PlatformStrategy for LinuxStrategy {
    fn web_group(&self, profile: &PlatformProfile, server: WebServer) -> String {
        profile.web_server_user.clone().unwrap_or_else(|| match server {
            WebServer::Apache => "apache".to_string(),
            WebServer::Nginx => "nginx".to_string(),
        })
    }

    fn permission_steps(&self, path: &Path, owner: &Identity, group: &str) -> Vec<CommandStep> {
        let target = path.to_string_lossy();
        let mut steps = vec![
            run(
                "set document root ownership",
                "chown",
                &["-R", &owner.owner_spec(group), &target],
            ),
            run("set default ACL", "setfacl", &["-R", "-d", "-m", DIR_ACL, &target]),
            find_exec("set directory ACL", path, "d", &["setfacl", "-m", DIR_ACL]),
            find_exec("set file ACL", path, "f", &["setfacl", "-m", FILE_ACL]),
            find_exec("set setgid on directories", path, "d", &["chmod", "g+s"]),
            find_exec("make files group-writable", path, "f", &["chmod", "g+w"]),
        ];

        for dir in writable_dirs(path) {
            let dir_arg = dir.to_string_lossy();
            let label = dir.strip_prefix(path).unwrap_or(&dir).display().to_string();
            steps.push(find_exec(&format!("set setgid on {label}"), &dir, "d", &["chmod", "g+s"]));
            steps.push(run(format!("set ACL on {label}"), "setfacl", &["-R", "-m", DIR_ACL, &dir_arg]));
            steps.push(run(
                format!("set default ACL on {label}"),
                "setfacl",
                &["-R", "-d", "-m", DIR_ACL, &dir_arg],
            ));
        }

        let storage = path.join("storage");
        let database = storage.join("database");
        if database.is_dir() {
            let db_arg = database.to_string_lossy();
            steps.push(run("set ACL on storage/database", "setfacl", &["-R", "-m", DIR_ACL, &db_arg]));
            steps.push(run(
                "set default ACL on storage/database",
                "setfacl",
                &["-R", "-d", "-m", DIR_ACL, &db_arg],
            ));
        }
        if storage.is_dir() {
            for file in sqlite_files(&storage) {
                let file_arg = file.to_string_lossy();
                let name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                steps.push(run(format!("make {name} writable"), "chmod", &["664", &file_arg]));
                steps.push(run(format!("set ACL on {name}"), "setfacl", &["-m", FILE_ACL, &file_arg]));
            }
        }

        steps
    }

    fn activation_plan(
        &self,
        profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        domain: &str,
        ssl: bool,
    ) -> Vec<ActivationStep> {
        match server {
            WebServer::Apache => {
                let mut plan = Vec::new();
                if ssl {
                    plan.push(ActivationStep::Run(
                        run("enable mod_ssl", "a2enmod", &["ssl"]).tolerating("already enabled"),
                    ));
                }
                let site = format!("{domain}.conf");
                plan.push(ActivationStep::Run(run("enable site", "a2ensite", &[&site])));
                plan.push(reload_step(profile, "apache2"));
                plan
            }
            WebServer::Nginx => vec![
                ActivationStep::Link {
                    target: descriptor.config_path.clone(),
                    link: Self::nginx_link(descriptor, domain),
                },
                ActivationStep::Run(run("test nginx configuration", "nginx", &["-t"])),
                reload_step(profile, "nginx"),
            ],
        }
    }

    fn deactivation_plan(
        &self,
        profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        domain: &str,
    ) -> Vec<ActivationStep> {
        match server {
            WebServer::Apache => {
                let site = format!("{domain}.conf");
                vec![
                    ActivationStep::Run(
                        run("disable site", "a2dissite", &[&site]).tolerating("does not exist"),
                    ),
                    ActivationStep::Remove {
                        path: descriptor.config_path.clone(),
                    },
                    reload_step(profile, "apache2"),
                ]
            }
            WebServer::Nginx => vec![
                ActivationStep::Unlink {
                    link: Self::nginx_link(descriptor, domain),
                },
                ActivationStep::Remove {
                    path: descriptor.config_path.clone(),
                },
                ActivationStep::Run(run("test nginx configuration", "nginx", &["-t"])),
                reload_step(profile, "nginx"),
            ],
        }
    }

    fn hosts_path(&self) -> PathBuf {
        PathBuf::from("/etc/hosts")
    }

    fn cert_root(&self, _profile: &PlatformProfile) -> PathBuf {
        PathBuf::from("/etc/ssl")
    }

    fn mkcert_install_steps(&self, profile: &PlatformProfile, _user: &Identity) -> Vec<CommandStep> {
        let kind = profile
            .package_manager
            .as_ref()
            .map_or(PackageManagerKind::Apt, |pm| pm.kind);
        let nss = match kind {
            PackageManagerKind::Dnf => run("install nss-tools", "dnf", &["install", "-y", "nss-tools"]),
            PackageManagerKind::Pacman => {
                run("install nss", "pacman", &["-S", "--noconfirm", "nss"])
            }
            PackageManagerKind::Apk => run("install nss-tools", "apk", &["add", "nss-tools"]),
            _ => run("install libnss3-tools", "apt-get", &["install", "-y", "libnss3-tools"]),
        };
        let url = format!(
            "https://dl.filippo.io/mkcert/latest?for=linux/{}",
            profile.arch.download_name()
        );
        vec![
            nss,
            run("download mkcert", "curl", &["-fsSL", "-o", "/usr/local/bin/mkcert", &url]),
            run("make mkcert executable", "chmod", &["+x", "/usr/local/bin/mkcert"]),
        ]
    }

    fn php_fpm_endpoint(&self, sysroot: &Sysroot) -> String {
        php::fpm_endpoint(sysroot)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DarwinStrategy;

impl PlatformStrategy for DarwinStrategy {
    fn web_group(&self, profile: &PlatformProfile, _server: WebServer) -> String {
        profile
            .web_server_user
            .clone()
            .unwrap_or_else(|| "_www".to_string())
    }

    fn permission_steps(&self, path: &Path, owner: &Identity, group: &str) -> Vec<CommandStep> {
        let target = path.to_string_lossy();
        let mut steps = vec![
            run(
                "set document root ownership",
                "chown",
                &["-R", &owner.owner_spec(group), &target],
            ),
            run("set document root mode", "chmod", &["-R", "u+rwX,g+rwX,o+rX", &target]),
            find_exec("set setgid on directories", path, "d", &["chmod", "g+s"]),
            find_exec("make files group-writable", path, "f", &["chmod", "g+w"]),
        ];
        for dir in writable_dirs(path) {
            let dir_arg = dir.to_string_lossy();
            let label = dir.strip_prefix(path).unwrap_or(&dir).display().to_string();
            steps.push(run(format!("make {label} writable"), "chmod", &["-R", "g+rwX", &dir_arg]));
        }
        steps
    }

    fn activation_plan(
        &self,
        _profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        _domain: &str,
        ssl: bool,
    ) -> Vec<ActivationStep> {
        match server {
            WebServer::Apache => {
                let httpd_conf = descriptor.server_root.join("httpd.conf");
                let mut plan = Vec::new();
                if ssl {
                    plan.push(ActivationStep::EnsureLine {
                        file: httpd_conf.clone(),
                        line: "LoadModule ssl_module lib/httpd/modules/mod_ssl.so".to_string(),
                        replaces: Some(
                            "#LoadModule ssl_module lib/httpd/modules/mod_ssl.so".to_string(),
                        ),
                        after: None,
                    });
                }
                plan.push(ActivationStep::EnsureLine {
                    file: httpd_conf,
                    line: format!(
                        "Include {}",
                        descriptor.server_root.join("extra/vhosts/*.conf").display()
                    ),
                    replaces: None,
                    after: None,
                });
                plan.push(ActivationStep::Run(run(
                    "test apache configuration",
                    "apachectl",
                    &["configtest"],
                )));
                plan.push(ActivationStep::Run(run("reload apache", "apachectl", &["-k", "graceful"])));
                plan
            }
            WebServer::Nginx => vec![
                ActivationStep::Run(run("test nginx configuration", "nginx", &["-t"])),
                ActivationStep::Run(run("reload nginx", "nginx", &["-s", "reload"])),
            ],
        }
    }

    fn deactivation_plan(
        &self,
        _profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        _domain: &str,
    ) -> Vec<ActivationStep> {
        let remove = ActivationStep::Remove {
            path: descriptor.config_path.clone(),
        };
        match server {
            WebServer::Apache => vec![
                remove,
                ActivationStep::Run(run("test apache configuration", "apachectl", &["configtest"])),
                ActivationStep::Run(run("reload apache", "apachectl", &["-k", "graceful"])),
            ],
            WebServer::Nginx => vec![
                remove,
                ActivationStep::Run(run("test nginx configuration", "nginx", &["-t"])),
                ActivationStep::Run(run("reload nginx", "nginx", &["-s", "reload"])),
            ],
        }
    }

    fn hosts_path(&self) -> PathBuf {
        PathBuf::from("/etc/hosts")
    }

    fn cert_root(&self, profile: &PlatformProfile) -> PathBuf {
        profile.homebrew_prefix().join("etc/ssl")
    }

    /// Homebrew refuses to run as root, so the install runs as the invoking
    /// user.
    fn mkcert_install_steps(&self, _profile: &PlatformProfile, user: &Identity) -> Vec<CommandStep> {
        vec![CommandStep::new(
            "install mkcert",
            CommandSpec::new("brew")
                .args(["install", "mkcert", "nss"])
                .as_user(user),
        )]
    }

    fn php_fpm_endpoint(&self, _sysroot: &Sysroot) -> String {
        php::DEFAULT_FPM_ADDRESS.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsStrategy;

impl WindowsStrategy {
    fn root(descriptor: &ConfigDescriptor) -> String {
        descriptor.server_root.to_string_lossy().into_owned()
    }
}

impl PlatformStrategy for WindowsStrategy {
    fn web_group(&self, _profile: &PlatformProfile, _server: WebServer) -> String {
        "Administrators".to_string()
    }

    fn permission_steps(&self, path: &Path, owner: &Identity, group: &str) -> Vec<CommandStep> {
        let target = path.to_string_lossy();
        vec![
            run(
                format!("grant {group} access"),
                "icacls",
                &[&target, "/grant:r", &format!("{group}:(OI)(CI)F"), "/T"],
            ),
            run(
                format!("grant {} access", owner.name),
                "icacls",
                &[&target, "/grant:r", &format!("{}:(OI)(CI)M", owner.name), "/T"],
            ),
        ]
    }

    fn activation_plan(
        &self,
        _profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        _domain: &str,
        ssl: bool,
    ) -> Vec<ActivationStep> {
        let root = Self::root(descriptor);
        match server {
            WebServer::Apache => {
                let httpd = format!(r"{root}\bin\httpd.exe");
                let httpd_conf = PathBuf::from(format!(r"{root}\conf\httpd.conf"));
                let mut plan = Vec::new();
                if ssl {
                    plan.push(ActivationStep::EnsureLine {
                        file: httpd_conf.clone(),
                        line: "LoadModule ssl_module modules/mod_ssl.so".to_string(),
                        replaces: Some("#LoadModule ssl_module modules/mod_ssl.so".to_string()),
                        after: None,
                    });
                }
                plan.push(ActivationStep::EnsureLine {
                    file: httpd_conf,
                    line: "Include conf/extra/vhosts/*.conf".to_string(),
                    replaces: None,
                    after: None,
                });
                plan.push(ActivationStep::Run(run("test apache configuration", &httpd, &["-t"])));
                plan.push(ActivationStep::Run(run("restart apache", &httpd, &["-k", "restart"])));
                plan
            }
            WebServer::Nginx => {
                let nginx = format!(r"{root}\nginx.exe");
                vec![
                    // The stock nginx.conf on Windows has no include for per-site files.
                    ActivationStep::EnsureLine {
                        file: PathBuf::from(format!(r"{root}\conf\nginx.conf")),
                        line: "include sites-enabled/*.conf;".to_string(),
                        replaces: None,
                        after: Some("http {".to_string()),
                    },
                    ActivationStep::Run(run("test nginx configuration", &nginx, &["-t", "-p", &root])),
                    ActivationStep::Run(run("reload nginx", &nginx, &["-s", "reload", "-p", &root])),
                ]
            }
        }
    }

    fn deactivation_plan(
        &self,
        _profile: &PlatformProfile,
        descriptor: &ConfigDescriptor,
        server: WebServer,
        _domain: &str,
    ) -> Vec<ActivationStep> {
        let root = Self::root(descriptor);
        let remove = ActivationStep::Remove {
            path: descriptor.config_path.clone(),
        };
        match server {
            WebServer::Apache => {
                let httpd = format!(r"{root}\bin\httpd.exe");
                vec![
                    remove,
                    ActivationStep::Run(run("test apache configuration", &httpd, &["-t"])),
                    ActivationStep::Run(run("restart apache", &httpd, &["-k", "restart"])),
                ]
            }
            WebServer::Nginx => {
                let nginx = format!(r"{root}\nginx.exe");
                vec![
                    remove,
                    ActivationStep::Run(run("test nginx configuration", &nginx, &["-t", "-p", &root])),
                    ActivationStep::Run(run("reload nginx", &nginx, &["-s", "reload", "-p", &root])),
                ]
            }
        }
    }

    fn hosts_path(&self) -> PathBuf {
        PathBuf::from(r"C:\Windows\System32\drivers\etc\hosts")
    }

    fn cert_root(&self, _profile: &PlatformProfile) -> PathBuf {
        PathBuf::from(r"C:\ProgramData\localsite\ssl")
    }

    fn mkcert_install_steps(&self, _profile: &PlatformProfile, _user: &Identity) -> Vec<CommandStep> {
        vec![run("install mkcert", "choco", &["install", "mkcert", "-y"])]
    }

    fn php_fpm_endpoint(&self, _sysroot: &Sysroot) -> String {
        php::DEFAULT_FPM_ADDRESS.to_string()
    }
}
