//! PHP prelude that serves a decrypted bundle from memory.
//!
//! The prelude replaces the `file` stream wrapper with one that answers
//! reads of protected paths from an in-memory table and forwards
//! everything else to the native wrapper. It then `require`s the entry
//! point by its path under the bundle root, so `__FILE__`, `__DIR__` and
//! relative includes resolve the same way they would on disk.

use base64::{engine::general_purpose::STANDARD, Engine};
use zeroize::Zeroizing;

use crate::executor::SourceBundle;

const PHP_RUNTIME: &str = r#"<?php
final class PhobBundleStream
{
    private static array $files = [];
    public $context;
    private ?string $data = null;
    private int $pos = 0;
    private $handle = null;
    private $dir = null;

    public static function mount(string $root, array $files): void
    {
        foreach ($files as $relative => $contents) {
            self::$files[self::key($root . '/' . $relative)] = $contents;
        }
        stream_wrapper_unregister('file');
        stream_wrapper_register('file', self::class);
    }

    private static function key(string $path): string
    {
        if (str_starts_with($path, 'file://')) {
            $path = substr($path, 7);
        }
        $path = str_replace('\\', '/', $path);
        if (!str_starts_with($path, '/') && !preg_match('#^[A-Za-z]:/#', $path)) {
            $path = str_replace('\\', '/', (string) getcwd()) . '/' . $path;
        }
        $parts = [];
        foreach (explode('/', $path) as $part) {
            if ($part === '' || $part === '.') {
                continue;
            }
            if ($part === '..') {
                array_pop($parts);
                continue;
            }
            $parts[] = $part;
        }
        return '/' . implode('/', $parts);
    }

    private static function isDir(string $key): bool
    {
        foreach (self::$files as $path => $_) {
            if (str_starts_with($path, $key . '/')) {
                return true;
            }
        }
        return false;
    }

    private static function native(callable $call)
    {
        stream_wrapper_restore('file');
        try {
            return $call();
        } finally {
            stream_wrapper_unregister('file');
            stream_wrapper_register('file', self::class);
        }
    }

    private static function virtualStat(int $size, bool $dir): array
    {
        $now = time();
        $stat = [
            'dev' => 0, 'ino' => 0, 'mode' => $dir ? 040555 : 0100444, 'nlink' => 1,
            'uid' => 0, 'gid' => 0, 'rdev' => 0, 'size' => $size,
            'atime' => $now, 'mtime' => $now, 'ctime' => $now, 'blksize' => -1, 'blocks' => -1,
        ];
        return array_merge(array_values($stat), $stat);
    }

    public function stream_open(string $path, string $mode, int $options, ?string &$opened): bool
    {
        $key = self::key($path);
        if (isset(self::$files[$key]) && strpbrk($mode, 'waxc+') === false) {
            $this->data = self::$files[$key];
            $this->pos = 0;
            $opened = $key;
            return true;
        }
        $this->handle = self::native(fn () => @fopen($path, $mode, (bool) ($options & STREAM_USE_PATH), $this->context));
        return $this->handle !== false;
    }

    public function stream_read(int $count): string|false
    {
        if ($this->handle) {
            return fread($this->handle, $count);
        }
        $chunk = (string) substr($this->data, $this->pos, $count);
        $this->pos += strlen($chunk);
        return $chunk;
    }

    public function stream_write(string $data): int
    {
        return $this->handle ? (int) fwrite($this->handle, $data) : 0;
    }

    public function stream_eof(): bool
    {
        return $this->handle ? feof($this->handle) : $this->pos >= strlen($this->data);
    }

    public function stream_tell(): int
    {
        return $this->handle ? (int) ftell($this->handle) : $this->pos;
    }

    public function stream_seek(int $offset, int $whence): bool
    {
        if ($this->handle) {
            return fseek($this->handle, $offset, $whence) === 0;
        }
        $target = match ($whence) {
            SEEK_CUR => $this->pos + $offset,
            SEEK_END => strlen($this->data) + $offset,
            default => $offset,
        };
        if ($target < 0) {
            return false;
        }
        $this->pos = $target;
        return true;
    }

    public function stream_stat(): array|false
    {
        return $this->handle ? fstat($this->handle) : self::virtualStat(strlen($this->data), false);
    }

    public function stream_flush(): bool
    {
        return $this->handle ? fflush($this->handle) : true;
    }

    public function stream_lock(int $operation): bool
    {
        return $this->handle ? flock($this->handle, $operation) : true;
    }

    public function stream_truncate(int $size): bool
    {
        return $this->handle ? ftruncate($this->handle, $size) : false;
    }

    public function stream_set_option(int $option, int $arg1, ?int $arg2): bool
    {
        return false;
    }

    public function stream_cast(int $as)
    {
        return $this->handle ?: false;
    }

    public function stream_close(): void
    {
        if ($this->handle) {
            fclose($this->handle);
        }
        $this->handle = null;
        $this->data = null;
    }

    public function stream_metadata(string $path, int $option, mixed $value): bool
    {
        return self::native(fn () => match ($option) {
            STREAM_META_TOUCH => touch($path, $value[0] ?? null, $value[1] ?? null),
            STREAM_META_OWNER, STREAM_META_OWNER_NAME => chown($path, $value),
            STREAM_META_GROUP, STREAM_META_GROUP_NAME => chgrp($path, $value),
            STREAM_META_ACCESS => chmod($path, $value),
            default => false,
        });
    }

    public function url_stat(string $path, int $flags): array|false
    {
        $key = self::key($path);
        if (isset(self::$files[$key])) {
            return self::virtualStat(strlen(self::$files[$key]), false);
        }
        $stat = self::native(fn () => ($flags & STREAM_URL_STAT_LINK) ? @lstat($path) : @stat($path));
        if ($stat === false && self::isDir($key)) {
            return self::virtualStat(0, true);
        }
        return $stat;
    }

    public function unlink(string $path): bool
    {
        return self::native(fn () => unlink($path, $this->context));
    }

    public function rename(string $from, string $to): bool
    {
        return self::native(fn () => rename($from, $to, $this->context));
    }

    public function mkdir(string $path, int $mode, int $options): bool
    {
        return self::native(fn () => mkdir($path, $mode, (bool) ($options & STREAM_MKDIR_RECURSIVE), $this->context));
    }

    public function rmdir(string $path, int $options): bool
    {
        return self::native(fn () => rmdir($path, $this->context));
    }

    public function dir_opendir(string $path, int $options): bool
    {
        $this->dir = self::native(fn () => @opendir($path, $this->context));
        return $this->dir !== false;
    }

    public function dir_readdir(): string|false
    {
        return readdir($this->dir);
    }

    public function dir_rewinddir(): bool
    {
        rewinddir($this->dir);
        return true;
    }

    public function dir_closedir(): bool
    {
        closedir($this->dir);
        return true;
    }
}
"#;

/// Renders the script piped to `php`: the stream wrapper, the mounted
/// bundle and a `require` of the entry point.
///
/// Strings are embedded as base64 so no path or source byte needs quoting.
pub(crate) fn render_php(bundle: &SourceBundle) -> Zeroizing<Vec<u8>> {
    let root = bundle.root().to_string_lossy();
    let mut script = String::with_capacity(
        PHP_RUNTIME.len() + bundle.files().map(|(_, c)| c.len() * 4 / 3 + 64).sum::<usize>(),
    );
    script.push_str(PHP_RUNTIME);

    script.push_str("$phobRoot = base64_decode('");
    script.push_str(&STANDARD.encode(root.as_bytes()));
    script.push_str("');\nPhobBundleStream::mount($phobRoot, [\n");
    for (path, contents) in bundle.files() {
        script.push_str("    base64_decode('");
        script.push_str(&STANDARD.encode(path.as_bytes()));
        script.push_str("') => base64_decode('");
        STANDARD.encode_string(contents, &mut script);
        script.push_str("'),\n");
    }
    script.push_str("]);\nchdir($phobRoot);\nrequire $phobRoot . '/' . base64_decode('");
    script.push_str(&STANDARD.encode(bundle.entry().as_bytes()));
    script.push_str("');\n");

    Zeroizing::new(script.into_bytes())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn every_file_is_mounted() {
        let mut files = BTreeMap::new();
        files.insert("index.php".to_string(), b"<?php require 'lib/a.php';".to_vec());
        files.insert("lib/a.php".to_string(), b"<?php function a() {}".to_vec());
        let bundle =
            SourceBundle::new("index.php".to_string(), PathBuf::from("/srv/app"), files);

        let script = render_php(&bundle);
        let script = std::str::from_utf8(&script).unwrap();

        assert!(script.starts_with("<?php\nfinal class PhobBundleStream"));
        assert!(script.contains(&STANDARD.encode("/srv/app")));
        for (path, contents) in bundle.files() {
            assert!(script.contains(&STANDARD.encode(path)), "{path} missing");
            assert!(script.contains(&STANDARD.encode(contents)), "{path} body missing");
        }
        assert!(script.ends_with(&format!(
            "require $phobRoot . '/' . base64_decode('{}');\n",
            STANDARD.encode("index.php")
        )));
        // Plaintext only appears encoded.
        assert!(!script.contains("function a()"));
    }
}
