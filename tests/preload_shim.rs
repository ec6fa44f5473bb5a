#![cfg(target_os = "linux")]

use idlewatch::wait_for_idle;
use std::io::{BufRead, BufReader, Read};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// Exercises every kind of interposed call, then blocks in accept() so the
/// test can watch the process go idle. Each failed check exits with its own
/// status.
const PROGRAM: &str = r#"
#define _GNU_SOURCE
#include <arpa/inet.h>
#include <errno.h>
#include <netinet/in.h>
#include <pthread.h>
#include <semaphore.h>
#include <signal.h>
#include <stdio.h>
#include <string.h>
#include <sys/socket.h>
#include <sys/time.h>
#include <time.h>
#include <unistd.h>

static sem_t work;
static sem_t ticks;

static void *worker(void *arg) {
    sem_wait(&work);
    return arg;
}

static void on_alarm(int sig) {
    int saved = errno;
    (void)sig;
    sem_post(&ticks);
    errno = saved;
}

static double seconds_since(const struct timespec *start) {
    struct timespec now;
    clock_gettime(CLOCK_MONOTONIC, &now);
    return (double)(now.tv_sec - start->tv_sec) + (now.tv_nsec - start->tv_nsec) / 1e9;
}

int main(void) {
    pthread_t thread;
    if (sem_init(&work, 0, 0) != 0) return 10;
    if (pthread_create(&thread, NULL, worker, NULL) != 0) return 11;
    sem_post(&work);
    if (pthread_join(thread, NULL) != 0) return 12;

    errno = 0;
    if (sem_trywait(&work) != -1 || errno != EAGAIN) return 13;

    pthread_condattr_t attr;
    pthread_cond_t cond;
    pthread_mutex_t mutex = PTHREAD_MUTEX_INITIALIZER;
    pthread_condattr_init(&attr);
    pthread_condattr_setclock(&attr, CLOCK_MONOTONIC);
    pthread_cond_init(&cond, &attr);
    struct timespec start, deadline;
    clock_gettime(CLOCK_MONOTONIC, &start);
    deadline = start;
    deadline.tv_nsec += 200000000;
    if (deadline.tv_nsec >= 1000000000) {
        deadline.tv_sec += 1;
        deadline.tv_nsec -= 1000000000;
    }
    pthread_mutex_lock(&mutex);
    int rc = pthread_cond_timedwait(&cond, &mutex, &deadline);
    pthread_mutex_unlock(&mutex);
    if (rc != ETIMEDOUT) return 14;
    if (seconds_since(&start) < 0.15) return 15;
    pthread_cond_destroy(&cond);

    /* Posts from a signal handler interrupt the hooks of the main loop */
    sem_init(&ticks, 0, 0);
    struct sigaction action;
    memset(&action, 0, sizeof action);
    action.sa_handler = on_alarm;
    action.sa_flags = SA_RESTART;
    sigaction(SIGALRM, &action, NULL);
    struct itimerval timer = {{0, 50}, {0, 50}};
    setitimer(ITIMER_REAL, &timer, NULL);
    for (int i = 0; i < 100000; i++) {
        sem_post(&ticks);
        sem_trywait(&ticks);
    }
    struct itimerval off;
    memset(&off, 0, sizeof off);
    setitimer(ITIMER_REAL, &off, NULL);
    while (sem_trywait(&ticks) == 0) {
    }

    int listener = socket(AF_INET, SOCK_STREAM, 0);
    struct sockaddr_in addr;
    socklen_t len = sizeof addr;
    memset(&addr, 0, sizeof addr);
    addr.sin_family = AF_INET;
    addr.sin_addr.s_addr = htonl(INADDR_LOOPBACK);
    if (bind(listener, (struct sockaddr *)&addr, sizeof addr) != 0) return 16;
    if (listen(listener, 1) != 0) return 17;
    getsockname(listener, (struct sockaddr *)&addr, &len);
    printf("%d\n", ntohs(addr.sin_port));
    fflush(stdout);

    int conn = accept(listener, NULL, NULL);
    if (conn < 0) return 18;
    close(conn);
    close(listener);
    puts("ok");
    return 0;
}
"#;

fn has_c_compiler() -> bool {
    Command::new("cc")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Build the preloadable library in its own target directory
fn build_shim() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let target_dir = manifest_dir.join("target").join("preload-shim");
    let status = Command::new(option_env!("CARGO").unwrap_or("cargo"))
        .current_dir(manifest_dir)
        .args(["build", "--lib", "--features", "preload", "--target-dir"])
        .arg(&target_dir)
        .status()
        .expect("Failed to run cargo");
    assert!(status.success(), "Building the preload library failed");
    target_dir.join("debug").join("libidlewatch.so")
}

#[test]
fn test_preloaded_program_keeps_its_contracts_and_goes_idle() {
    if !has_c_compiler() {
        eprintln!("skipping: no C compiler on PATH");
        return;
    }
    let library = build_shim();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("program.c");
    let binary = dir.path().join("program");
    let state_file = dir.path().join("state");
    std::fs::write(&source, PROGRAM).unwrap();

    let status = Command::new("cc")
        .arg(&source)
        .arg("-o")
        .arg(&binary)
        .arg("-pthread")
        .status()
        .unwrap();
    assert!(status.success(), "Compiling the test program failed");

    let mut child = Command::new(&binary)
        .env("LD_PRELOAD", &library)
        .env("IDLEWATCH_STATEFILE", &state_file)
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    let mut port = String::new();
    stdout.read_line(&mut port).unwrap();
    let port: u16 = match port.trim().parse() {
        Ok(port) => port,
        Err(_) => panic!("Program failed before accept: {:?}", child.wait().unwrap()),
    };

    // Only thread left is parked in accept()
    let idle = wait_for_idle(
        &state_file,
        None,
        Duration::from_millis(5),
        Some(Duration::from_secs(5)),
    )
    .unwrap();
    assert!(idle.is_some(), "Program never went idle while in accept()");

    TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut rest = String::new();
    stdout.read_to_string(&mut rest).unwrap();
    assert_eq!(rest.trim(), "ok");
    assert!(child.wait().unwrap().success());
}
