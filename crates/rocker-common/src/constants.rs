//! System-wide constants and default values.

/// Default cache root used when neither the config file nor the CLI names one.
pub const DEFAULT_CACHE_ROOT: &str = "/tmp/rocker";

/// Directory under the cache root holding downloaded layer archives.
pub const LAYERS_DIR: &str = "layers";

/// Directory under the cache root holding assembled root filesystems.
pub const ROOTFS_DIR: &str = "rootfs";

/// Suffix of every downloaded layer archive (gzip-compressed tar).
pub const LAYER_FILE_SUFFIX: &str = ".tar.gz";

/// Permission mode for directories created during extraction.
pub const DIR_MODE: u32 = 0o755;

/// Docker Hub token endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io/token";

/// Service name sent to the Docker Hub token endpoint.
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";

/// Docker Hub registry API base URL.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Namespace prefix for single-component Docker Hub image names.
pub const OFFICIAL_NAMESPACE: &str = "library";

/// Tag assumed when an image reference carries none.
pub const DEFAULT_TAG: &str = "latest";

/// Media type of a Docker manifest list.
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Media type of an OCI image index.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Media type of a Docker single-platform manifest.
pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Media type of an OCI single-platform manifest.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Default memory ceiling for a launch: 1 GiB.
pub const DEFAULT_MEMORY_MAX_BYTES: u64 = 1024 * 1024 * 1024;

/// Default CPU quota per period (10% of one CPU).
pub const DEFAULT_CPU_QUOTA_US: u64 = 10_000;

/// Default CPU accounting period.
pub const DEFAULT_CPU_PERIOD_US: u64 = 100_000;

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// Parent cgroup under which per-launch groups are created.
pub const CGROUP_PARENT: &str = "rocker";

/// Environment variable marking the re-executed process as the container init.
pub const INIT_ENV: &str = "ROCKER_INIT";

/// Environment variable carrying the JSON launch spec to the init process.
pub const LAUNCH_SPEC_ENV: &str = "ROCKER_LAUNCH_SPEC";

/// Environment variable carrying the start-gate pipe descriptor.
pub const SYNC_FD_ENV: &str = "ROCKER_SYNC_FD";

/// Mount point of the process-information filesystem inside the container.
pub const PROC_MOUNT: &str = "/proc";

