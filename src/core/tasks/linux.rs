//! Upstart-managed Node.js hosts.
//!
//! Layout on the host:
//! - `/opt/<app>/app` current release, `/opt/<app>/previous` the one before
//! - `/opt/<app>/config/env.sh` exported env, sourced by the job
//! - `/opt/<app>/tmp` upload staging
//! - `/etc/init/<app>.conf` upstart job, logging to `/var/log/upstart/<app>.log`

use crate::build::BUNDLE_FILE_NAME;
use crate::config::{Config, EnvMap, SslConfig};
use crate::task::{DeployTaskArgs, TaskList, TaskProducer};
use crate::utils::shell;

pub const OS: &str = "linux";

#[derive(Debug, Default, Clone)]
pub struct LinuxTasks;

fn app_root(app_name: &str) -> String {
    format!("/opt/{}", app_name)
}

fn env_file(app_name: &str) -> String {
    format!("{}/config/env.sh", app_root(app_name))
}

pub fn log_file(app_name: &str) -> String {
    format!("/var/log/upstart/{}.log", app_name)
}

fn upstart_job(app_name: &str) -> String {
    let root = app_root(app_name);
    format!(
        "description \"{app}\"\n\
         start on runlevel [2345]\n\
         stop on runlevel [!2345]\n\
         respawn\n\
         limit nofile 65536 65536\n\
         console log\n\
         \n\
         script\n\
         \x20 cd {root}/app\n\
         \x20 . {root}/config/env.sh\n\
         \x20 exec node main.js\n\
         end script\n",
        app = app_name,
        root = root,
    )
}

fn stud_config(app_name: &str, ssl: &SslConfig) -> String {
    format!(
        "frontend = [*]:443\n\
         backend = [127.0.0.1]:{port}\n\
         pem-file = \"{root}/config/bundle.pem\"\n\
         ciphers = \"ECDHE-RSA-AES128-GCM-SHA256:ECDHE-RSA-AES256-GCM-SHA384\"\n\
         daemon = on\n",
        port = ssl.backend_port,
        root = app_root(app_name),
    )
}

fn restart_command(job: &str) -> String {
    format!("sudo stop {job} || :\nsudo start {job}", job = job)
}

fn extract_command(app_name: &str) -> String {
    let root = shell::quote_path(&app_root(app_name));
    let job = shell::quote_arg(app_name);
    format!(
        "set -e\n\
         ROOT={root}\n\
         sudo rm -rf \"$ROOT/tmp/bundle\"\n\
         sudo mkdir -p \"$ROOT/tmp/bundle\"\n\
         sudo tar xzf \"$ROOT/tmp/{bundle}\" -C \"$ROOT/tmp/bundle\"\n\
         if [ -d \"$ROOT/app\" ]; then\n\
         \x20 sudo rm -rf \"$ROOT/previous\"\n\
         \x20 sudo mv \"$ROOT/app\" \"$ROOT/previous\"\n\
         fi\n\
         sudo mv \"$ROOT/tmp/bundle\" \"$ROOT/app\"\n\
         {restart}",
        root = root,
        bundle = BUNDLE_FILE_NAME,
        restart = restart_command(&job),
    )
}

fn verify_command(app_name: &str, wait_secs: u64) -> String {
    let root = shell::quote_path(&app_root(app_name));
    let job = shell::quote_arg(app_name);
    format!(
        "sleep {wait}\n\
         if sudo status {job} | grep -q 'start/running'; then exit 0; fi\n\
         echo 'Deployment check failed, reverting to previous release' >&2\n\
         ROOT={root}\n\
         if [ -d \"$ROOT/previous\" ]; then\n\
         \x20 sudo rm -rf \"$ROOT/app\"\n\
         \x20 sudo mv \"$ROOT/previous\" \"$ROOT/app\"\n\
         \x20 sudo stop {job} || :\n\
         \x20 sudo start {job} || :\n\
         fi\n\
         exit 1",
        wait = wait_secs,
        job = job,
        root = root,
    )
}

impl TaskProducer for LinuxTasks {
    fn os(&self) -> &str {
        OS
    }

    fn setup(&self, config: &Config) -> TaskList {
        let app = &config.app_name;
        let root = shell::quote_path(&app_root(app));

        let mut list = TaskList::new("Setup").execute(
            "Creating app directories",
            format!(
                "sudo mkdir -p {root}/app {root}/config {root}/tmp && sudo chown -R \"$USER\" {root}",
                root = root
            ),
        );

        if config.setup_node {
            list = list.execute(
                format!("Installing Node.js {}", config.node_version),
                format!(
                    "curl -fsSL https://deb.nodesource.com/setup_{}.x | sudo -E bash - && sudo apt-get install -y nodejs",
                    shell::quote_arg(&config.node_version)
                ),
            );
        }

        if config.setup_phantom {
            list = list.execute(
                "Installing PhantomJS",
                "sudo apt-get install -y phantomjs",
            );
        }

        // env.sh carries per-host values, so deploy and reconfig write it.
        list = list.write_file(
            "Configuring upstart",
            format!("/etc/init/{}.conf", app),
            upstart_job(app),
        );

        if let Some(ssl) = &config.ssl {
            list = list
                .execute("Installing stud", "sudo apt-get install -y stud")
                .upload(
                    "Uploading SSL certificate",
                    &ssl.pem,
                    format!("{}/config/bundle.pem", app_root(app)),
                    false,
                )
                .write_file(
                    "Configuring stud",
                    format!("{}/config/stud.conf", app_root(app)),
                    stud_config(app, ssl),
                )
                .execute(
                    "Restarting stud",
                    format!(
                        "sudo pkill stud || :\nsudo stud --config {}",
                        shell::quote_path(&format!("{}/config/stud.conf", app_root(app)))
                    ),
                );
        }

        list
    }

    fn deploy(&self, args: &DeployTaskArgs) -> TaskList {
        let app = &args.app_name;

        TaskList::new("Deploy")
            .sequential()
            .upload(
                "Uploading bundle",
                &args.bundle_path,
                format!("{}/tmp/{}", app_root(app), BUNDLE_FILE_NAME),
                args.enable_upload_progress_bar,
            )
            .write_file("Setting up environment", env_file(app), shell::env_exports(&args.env))
            .execute("Invoking deployment process", extract_command(app))
            .execute(
                "Verifying deployment",
                verify_command(app, args.deploy_check_wait_time),
            )
    }

    fn reconfig(&self, env: &EnvMap, app_name: &str) -> TaskList {
        TaskList::new("Reconfig")
            .sequential()
            .write_file("Setting up environment", env_file(app_name), shell::env_exports(env))
            .execute(
                "Restarting app",
                restart_command(&shell::quote_arg(app_name)),
            )
    }

    fn restart(&self, app_name: &str) -> TaskList {
        TaskList::new("Restarting app").execute(
            "Restarting app",
            restart_command(&shell::quote_arg(app_name)),
        )
    }

    fn stop(&self, app_name: &str) -> TaskList {
        TaskList::new("Stopping app").execute(
            "Stopping app",
            format!("sudo stop {}", shell::quote_arg(app_name)),
        )
    }

    fn start(&self, app_name: &str) -> TaskList {
        TaskList::new("Starting app").execute(
            "Starting app",
            format!("sudo start {}", shell::quote_arg(app_name)),
        )
    }
}
